use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, middleware, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use expose_operator::{controller, Context};
use log::info;

#[derive(Parser, Debug)]
struct Args {
    /// Namespace whose workloads are exposed.
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Label selector restricting which workloads are watched.
    #[arg(long, env = "WATCH_SELECTOR")]
    selector: Option<String>,

    /// Deadline for each individual apiserver call.
    #[arg(long, default_value_t = 30)]
    call_timeout_secs: u64,

    /// How long to wait for the workload cache to sync at startup.
    #[arg(long, default_value_t = 10)]
    cache_sync_timeout_secs: u64,

    /// Fail startup if the cache does not sync in time instead of
    /// reconciling against partial state.
    #[arg(long)]
    require_cache_sync: bool,
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    info!("starting expose operator");

    let args: Args = Args::parse();

    let kube_cli = kube::Client::try_default().await?;

    let ctx = Arc::new(Context {
        kube_cli,
        namespace: args.namespace,
        selector: args.selector,
        call_timeout: Duration::from_secs(args.call_timeout_secs),
        cache_sync_timeout: Duration::from_secs(args.cache_sync_timeout_secs),
        require_cache_sync: args.require_cache_sync,
    });

    let workloads = controller::run(ctx.clone());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
    })
    .bind("0.0.0.0:2000")?
    .shutdown_timeout(5)
    .run();

    let (result, _) = tokio::join!(workloads, server);

    result
}

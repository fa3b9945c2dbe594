use chrono::Utc;
use clap::Parser;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::{Api, ResourceExt};

/// Read-only listing of the ingresses in a namespace.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let args: Args = Args::parse();

    let client = kube::Client::try_default().await?;
    let ingresses: Api<Ingress> = Api::namespaced(client, &args.namespace);

    let list = ingresses.list(&ListParams::default()).await?;
    if list.items.is_empty() {
        println!("no ingress found in namespace {}", args.namespace);
        return Ok(());
    }

    for ingress in list.items {
        let age_minutes = ingress
            .creation_timestamp()
            .map(|created| (Utc::now() - created.0).num_minutes())
            .unwrap_or_default();
        let endpoints: Vec<String> = ingress
            .status
            .iter()
            .filter_map(|status| status.load_balancer.as_ref())
            .flat_map(|lb| lb.ingress.iter().flatten())
            .filter_map(|lb| lb.hostname.clone().or_else(|| lb.ip.clone()))
            .collect();
        println!(
            "{}\t{}\t{}m\t{}",
            ingress.name_any(),
            ingress.namespace().unwrap_or_default(),
            age_minutes,
            endpoints.join(",")
        );
    }

    Ok(())
}

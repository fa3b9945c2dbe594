//! Synthesis of the dependent Service and Ingress for a workload.

use anyhow::anyhow;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::error::Error;

pub const EXPOSED_PORT: i32 = 5000;
pub const EXPOSED_PORT_NAME: &str = "expose-http";

const REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";

/// Service exposing a workload: port 5000 mapped to the first container's
/// first declared port, resolved by name. The selector is copied verbatim
/// from the pod template labels; a template without labels yields a Service
/// that selects nothing.
pub fn service_for(workload: &Deployment) -> Result<Service, Error> {
    let name = workload.name_any();
    let template = workload.spec.as_ref().map(|spec| &spec.template);

    let selector = template
        .and_then(|template| template.metadata.as_ref())
        .and_then(|meta| meta.labels.clone());

    let target_port = template
        .and_then(|template| template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|container| container.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|port| port.name.clone())
        .ok_or_else(|| Error::NoNamedPort(name.clone()))?;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: workload.namespace(),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            selector,
            ports: Some(vec![ServicePort {
                name: Some(EXPOSED_PORT_NAME.to_string()),
                port: EXPOSED_PORT,
                target_port: Some(IntOrString::String(target_port)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

/// Ingress routing `/<name>` (prefix match) to the given Service. Built
/// from the Service object the apiserver returned so server-assigned
/// defaults carry over into the backend reference.
pub fn ingress_for(service: &Service) -> Result<Ingress, Error> {
    let name = service.name_any();
    let backend_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.port)
        .ok_or_else(|| anyhow!("service {name} exposes no port to back an ingress"))?;

    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: service.namespace(),
            annotations: Some(
                [(REWRITE_TARGET_ANNOTATION.to_string(), "/".to_string())].into(),
            ),
            ..ObjectMeta::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(format!("/{name}")),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name,
                                port: Some(ServiceBackendPort {
                                    number: Some(backend_port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
                ..IngressRule::default()
            }]),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kube::api::ObjectMeta;

    use super::{ingress_for, service_for, EXPOSED_PORT};
    use crate::error::Error;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn workload(
        template_labels: Option<BTreeMap<String, String>>,
        port_name: Option<&str>,
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("ns1".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                selector: LabelSelector::default(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: template_labels,
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "app".to_string(),
                            ports: port_name.map(|name| {
                                vec![ContainerPort {
                                    container_port: 8080,
                                    name: Some(name.to_string()),
                                    ..ContainerPort::default()
                                }]
                            }),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn service_copies_selector_and_maps_the_named_port() {
        let service = service_for(&workload(
            Some(labels(&[("app", "web")])),
            Some("http"),
        ))
        .unwrap();

        assert_eq!(service.metadata.name.as_deref(), Some("web"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("ns1"));

        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, Some(labels(&[("app", "web")])));

        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, EXPOSED_PORT);
        assert_eq!(
            port.target_port,
            Some(IntOrString::String("http".to_string()))
        );
    }

    #[test]
    fn service_without_template_labels_selects_nothing() {
        let service = service_for(&workload(None, Some("http"))).unwrap();
        assert_eq!(service.spec.unwrap().selector, None);
    }

    #[test]
    fn service_requires_a_named_container_port() {
        assert!(matches!(
            service_for(&workload(None, None)),
            Err(Error::NoNamedPort(name)) if name == "web"
        ));
    }

    #[test]
    fn ingress_routes_a_prefix_path_to_the_service_port() {
        let service = service_for(&workload(
            Some(labels(&[("app", "web")])),
            Some("http"),
        ))
        .unwrap();
        let ingress = ingress_for(&service).unwrap();

        assert_eq!(ingress.metadata.name.as_deref(), Some("web"));
        assert_eq!(
            ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get("nginx.ingress.kubernetes.io/rewrite-target"))
                .map(String::as_str),
            Some("/")
        );

        let rules = ingress.spec.unwrap().rules.unwrap();
        let path = &rules[0].http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/web"));
        assert_eq!(path.path_type, "Prefix");

        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "web");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(EXPOSED_PORT));
    }

    #[test]
    fn ingress_requires_a_service_port() {
        let bare = k8s_openapi::api::core::v1::Service::default();
        assert!(ingress_for(&bare).is_err());
    }
}

use super::{ClientError, ClusterClient, EventType};
use crate::constants::CONTROLLER_NAME;
use crate::crd::{Elasticsearch, Kibana, StackConfigPolicy, StackConfigPolicyStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, warn};

/// [`ClusterClient`] talking to the Kubernetes API server
pub struct KubeClusterClient {
    client: Client,
    recorder: Recorder,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Maps 404 and 409 onto the dedicated variants
fn map_err(kind: &'static str, namespace: &str, name: &str) -> impl FnOnce(kube::Error) -> ClientError {
    let namespace = namespace.to_string();
    let name = name.to_string();
    move |err| match err {
        kube::Error::Api(api_err) if api_err.code == 404 => ClientError::NotFound { kind, namespace, name },
        kube::Error::Api(api_err) if api_err.code == 409 => ClientError::Conflict { kind, namespace, name },
        other => ClientError::Kube(other),
    }
}

fn secret_ref(secret: &Secret) -> (String, String) {
    (
        secret.namespace().unwrap_or_default(),
        secret.name_any(),
    )
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_policies(&self) -> Result<Vec<StackConfigPolicy>, ClientError> {
        let api: Api<StackConfigPolicy> = self.api(None);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<StackConfigPolicy>, ClientError> {
        let api: Api<StackConfigPolicy> = self.api(Some(namespace));
        Ok(api.get_opt(name).await?)
    }

    async fn list_elasticsearches(&self, namespace: Option<&str>) -> Result<Vec<Elasticsearch>, ClientError> {
        let api: Api<Elasticsearch> = self.api(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_elasticsearch(&self, namespace: &str, name: &str) -> Result<Option<Elasticsearch>, ClientError> {
        let api: Api<Elasticsearch> = self.api(Some(namespace));
        Ok(api.get_opt(name).await?)
    }

    async fn list_kibanas(&self, namespace: Option<&str>) -> Result<Vec<Kibana>, ClientError> {
        let api: Api<Kibana> = self.api(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClientError> {
        let api: Api<Secret> = self.api(Some(namespace));
        Ok(api.get_opt(name).await?)
    }

    async fn list_secrets(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<Secret>, ClientError> {
        let api: Api<Secret> = self.api(namespace);
        Ok(api.list(&ListParams::default().labels(label_selector)).await?.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        let (namespace, name) = secret_ref(secret);
        let api: Api<Secret> = self.api(Some(&namespace));
        debug!(secret.namespace = %namespace, secret.name = %name, "Creating secret");
        api.create(&PostParams::default(), secret)
            .await
            .map_err(map_err("Secret", &namespace, &name))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        let (namespace, name) = secret_ref(secret);
        let api: Api<Secret> = self.api(Some(&namespace));
        debug!(secret.namespace = %namespace, secret.name = %name, "Updating secret");
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map_err(map_err("Secret", &namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let api: Api<Secret> = self.api(Some(namespace));
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError> {
        let api: Api<Pod> = self.api(Some(namespace));
        Ok(api.list(&ListParams::default().labels(label_selector)).await?.items)
    }

    async fn update_policy_status(
        &self,
        policy: &StackConfigPolicy,
        status: &StackConfigPolicyStatus,
    ) -> Result<(), ClientError> {
        let namespace = policy.namespace_or_default();
        let name = policy.name_or_default();
        let api: Api<StackConfigPolicy> = self.api(Some(namespace));
        // the resource version turns the merge patch into an optimistic update
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": policy.metadata.resource_version },
            "status": status,
        });
        api.patch_status(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
            .await
            .map_err(map_err("StackConfigPolicy", namespace, name))?;
        Ok(())
    }

    async fn add_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError> {
        if policy.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let mut finalizers = policy.finalizers().to_vec();
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(policy, finalizers).await
    }

    async fn remove_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError> {
        if !policy.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let finalizers = policy
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        self.patch_finalizers(policy, finalizers).await
    }

    async fn publish_event(&self, policy: &StackConfigPolicy, event_type: EventType, reason: &str, note: String) {
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &policy.object_ref(&())).await {
            warn!(
                policy.namespace = %policy.namespace_or_default(),
                policy.name = %policy.name_or_default(),
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

impl KubeClusterClient {
    async fn patch_finalizers(&self, policy: &StackConfigPolicy, finalizers: Vec<String>) -> Result<(), ClientError> {
        let namespace = policy.namespace_or_default();
        let name = policy.name_or_default();
        let api: Api<StackConfigPolicy> = self.api(Some(namespace));
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": policy.metadata.resource_version,
                "finalizers": finalizers,
            }
        });
        match api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await {
            Ok(_) => Ok(()),
            // already gone, nothing left to guard
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(map_err("StackConfigPolicy", namespace, name)(e)),
        }
    }
}

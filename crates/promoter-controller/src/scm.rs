//! Resolution of the SCM provider and its credential secret from a
//! repository reference.

use promoter_model::scm_provider::{RepositoryReference, ScmProvider, Secret};
use promoter_store::{ObjectStore, Stores};
use tracing::info;

use crate::error::ControllerResult;

/// Fetch the `ScmProvider` referenced by `repo` and the secret it names.
///
/// The provider reference may cross namespaces; the secret always lives in
/// the provider's namespace.
pub async fn scm_provider_and_secret(
    stores: &Stores,
    repo: &RepositoryReference,
    fallback_namespace: &str,
) -> ControllerResult<(ScmProvider, Secret)> {
    let namespace = repo
        .scm_provider_ref
        .namespace
        .as_deref()
        .unwrap_or(fallback_namespace);

    let provider = match stores
        .scm_providers
        .get(namespace, &repo.scm_provider_ref.name)
        .await
    {
        Ok(provider) => provider,
        Err(err) if err.is_not_found() => {
            info!(namespace = %namespace, name = %repo.scm_provider_ref.name, "ScmProvider not found");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    let secret = match stores
        .secrets
        .get(&provider.metadata.namespace, &provider.spec.secret_ref.name)
        .await
    {
        Ok(secret) => secret,
        Err(err) if err.is_not_found() => {
            info!(
                namespace = %provider.metadata.namespace,
                name = %provider.spec.secret_ref.name,
                "Secret from ScmProvider not found"
            );
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    Ok((provider, secret))
}

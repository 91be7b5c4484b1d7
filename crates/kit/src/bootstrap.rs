//! Registry seeding for local deployments

use tracing::info;

use orgkit_core::{Address, AppKind};
use orgkit_registry::{NameRegistry, PackageIndex, PackageVersion, SemanticVersion};

use crate::KitResult;

/// Register `domain` and publish version 1.0.0 of every required
/// application kind under it, all owned by `publisher`
pub async fn publish_required_apps(
    names: &NameRegistry,
    packages: &PackageIndex,
    domain: &str,
    publisher: Address,
) -> KitResult<Vec<PackageVersion>> {
    names.register(domain, publisher, Some(publisher)).await?;

    let mut published = Vec::with_capacity(AppKind::REQUIRED.len());
    for kind in AppKind::REQUIRED {
        let app_id = names.register(&kind.package_name(domain), publisher, None).await?;
        let code = format!("orgkit:{}", kind.label());
        published.push(packages.publish(app_id, SemanticVersion(1, 0, 0), code.as_bytes()).await?);
    }
    info!(domain, packages = published.len(), "Required applications published");
    Ok(published)
}

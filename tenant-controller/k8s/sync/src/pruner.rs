use crate::{cluster::Object, Cluster, Context, Result};
use tenant_controller_core::retry_on_conflict;
use tenant_controller_k8s_api::Selector;

/// Deletes the managed objects of kind `K` in `namespace` whose type label is
/// not one of `keep`. With nothing to keep, every managed object goes.
pub async fn prune<C, K>(ctx: Context<'_, C>, namespace: &str, keep: &[String]) -> Result<()>
where
    C: Cluster,
    K: Object,
{
    let label = ctx.registry.type_label::<K>();
    let selector = Selector::default()
        .with_exists(&label)
        .with_not_in(&label, keep);
    tracing::debug!(%namespace, %selector, "Pruning {}", K::kind(&()));

    let selector = &selector;
    retry_on_conflict(ctx.backoff, move || {
        ctx.cluster.delete_collection::<K>(namespace, selector)
    })
    .await
}

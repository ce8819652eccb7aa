use tracing::info;
use vulngraph_client::PageSource;
use vulngraph_types::{DirectRelationship, RelationshipClass};

use super::{
    StageContext, StageReport, StageState, add_entity_once, add_relationship_once, load_entity,
};
use crate::constants::{DATA_ACCOUNT_ENTITY, DATA_VMDR_SERVICE_ENTITY};
use crate::converters::{create_account_entity, create_vmdr_service_entity};
use crate::error::StageError;

/// Create the account entity every other entity hangs off.
pub async fn fetch_account<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    report.enter(StageState::Converting);
    let account = create_account_entity(ctx.config, &ctx.ui_host);

    report.enter(StageState::Writing);
    ctx.state
        .set_data(DATA_ACCOUNT_ENTITY, serde_json::to_value(&account)?)
        .await?;
    let key = account.key.clone();
    add_entity_once(ctx.state, account, report).await?;
    info!(key = %key, "account entity ready");
    Ok(())
}

/// Create the scanning service entity and link it to the account.
pub async fn fetch_services<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let account = load_entity(ctx.state, DATA_ACCOUNT_ENTITY).await?;

    report.enter(StageState::Converting);
    let service = create_vmdr_service_entity(&account.key);
    let has = DirectRelationship::new(RelationshipClass::Has, &account, &service);

    report.enter(StageState::Writing);
    ctx.state
        .set_data(DATA_VMDR_SERVICE_ENTITY, serde_json::to_value(&service)?)
        .await?;
    add_entity_once(ctx.state, service, report).await?;
    add_relationship_once(ctx.state, has, report).await?;
    Ok(())
}

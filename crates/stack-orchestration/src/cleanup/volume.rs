//! Volume cleanup.

use super::Operation;
use crate::context::OperationContext;
use crate::model::Project;
use crate::progress::{Event, Phase, STILL_IN_USE};
use crate::runtime::RuntimeClient;
use crate::Result;
use tracing::debug;

/// One removal per volume owned by the stack; external volumes are skipped
pub fn plan(project: &Project) -> Vec<Operation> {
    project
        .volumes
        .values()
        .filter(|volume| !volume.external)
        .map(|volume| Operation::RemoveVolume {
            name: volume.name.clone(),
        })
        .collect()
}

/// Force-remove a volume; an absent volume is already in the desired state
pub async fn remove_volume(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    name: &str,
) -> Result<()> {
    match ctx.guard(client.inspect_volume(name)).await? {
        Err(e) if e.is_not_found() => {
            debug!("Volume '{}' already gone", name);
            return Ok(());
        }
        _ => {}
    }

    let id = format!("Volume {name}");
    ctx.event(Event::removing(&id));

    match ctx.guard(client.remove_volume(name, true)).await? {
        Ok(()) => ctx.event(Event::removed(&id)),
        Err(e) if e.is_conflict() => ctx.event(Event::warning(&id, STILL_IN_USE)),
        Err(e) if e.is_not_found() => ctx.event(Event::new(
            &id,
            Phase::Done,
            "Warning: No resource found to remove",
        )),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

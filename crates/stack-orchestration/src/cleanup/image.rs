//! Image cleanup.

use super::Operation;
use crate::config::ImageRemoval;
use crate::context::OperationContext;
use crate::labels;
use crate::model::Project;
use crate::progress::{Event, Phase, STILL_IN_USE};
use crate::runtime::{Filter, RuntimeClient};
use crate::Result;
use indexmap::IndexSet;
use tracing::debug;

/// Add the implicit `latest` tag to an untagged reference
pub fn normalize_reference(reference: &str) -> String {
    let name = reference.rsplit('/').next().unwrap_or(reference);
    if reference.contains('@') || name.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// Plan image removals for the stack.
///
/// `Local` selects the images built by the stack: images labeled with the
/// stack and one of its services, and the default-named image of every
/// service with `build` set. `All` adds every image the services reference.
/// With `remove_orphans`, labeled images of services no longer in the model
/// are added. Only images present in the runtime produce an operation.
pub async fn plan(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    project: &Project,
    mode: ImageRemoval,
    remove_orphans: bool,
) -> Result<Vec<Operation>> {
    if mode == ImageRemoval::None {
        return Ok(Vec::new());
    }

    let mut candidates: IndexSet<String> = project
        .services
        .values()
        .filter(|service| service.build || mode == ImageRemoval::All)
        .map(|service| service.image_name(&project.name))
        .collect();

    // Images built for the stack carry its labels, even when the model was
    // recovered from containers and knows nothing about `build`.
    let filter = labels::project_filter(&project.name).label_present(labels::SERVICE);
    for image in ctx.guard(client.list_images(&filter)).await?? {
        let declared = image
            .labels
            .get(labels::SERVICE)
            .is_some_and(|service| project.services.contains_key(service));
        if declared || remove_orphans {
            candidates.extend(image.repo_tags.iter().cloned());
        }
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let filter = candidates
        .iter()
        .fold(Filter::new(), |filter, reference| filter.reference(reference));
    let present: IndexSet<String> = ctx
        .guard(client.list_images(&filter))
        .await??
        .into_iter()
        .flat_map(|image| image.repo_tags)
        .map(|tag| normalize_reference(&tag))
        .collect();

    let mut seen = IndexSet::new();
    let operations = candidates
        .into_iter()
        .filter(|reference| {
            let normalized = normalize_reference(reference);
            if !present.contains(&normalized) {
                debug!("Image '{}' not present, skipping", reference);
                return false;
            }
            seen.insert(normalized)
        })
        .map(|reference| Operation::RemoveImage { reference })
        .collect();
    Ok(operations)
}

/// Remove one image by reference
pub async fn remove_image(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    reference: &str,
) -> Result<()> {
    let id = format!("Image {reference}");
    ctx.event(Event::removing(&id));

    match ctx.guard(client.remove_image(reference)).await? {
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

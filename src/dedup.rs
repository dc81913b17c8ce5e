use tracing::{info, warn};

use crate::domain::{Category, WorkingSet};
use crate::library::Library;

/// Returns the items of `working_set` not yet present in `library`.
///
/// Only reads the filesystem.
pub fn filter_existing(working_set: &WorkingSet, library: &Library, category: &Category) -> WorkingSet {
    let retained: WorkingSet = working_set
        .iter()
        .filter(|item| {
            let present = library.contains(category, &item.canonical_name());
            if present {
                warn!(item = %item, "beatmap set already downloaded");
            }
            !present
        })
        .cloned()
        .collect();
    info!(
        kept = retained.len(),
        dropped = working_set.len() - retained.len(),
        "filtered local duplicates"
    );
    retained
}

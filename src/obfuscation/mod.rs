//! Decoy-container scheme.
//!
//! Surrounds the real challenge container with a random number of inert
//! decoys and shuffles the DOM insertion order, so static scraping of the
//! page cannot tell which container hosts the real widget by position. This
//! is an obstruction, not a security boundary.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::page::HostPage;

/// A planned layout: which decoy ids to create and the shuffled order every
/// container (real one included) ends up in.
#[derive(Debug, Clone)]
pub struct DecoyLayout {
    pub real_id: String,
    pub decoy_ids: Vec<String>,
    /// Final insertion order over decoys plus the real container.
    pub order: Vec<String>,
}

/// Draw a decoy count uniformly from `[min, max]` inclusive, synthesize ids,
/// and shuffle the combined list (Fisher-Yates).
pub fn plan_layout<R: Rng + ?Sized>(
    rng: &mut R,
    real_id: &str,
    min_decoys: u32,
    max_decoys: u32,
) -> DecoyLayout {
    let upper = max_decoys.max(min_decoys);
    let count = rng.gen_range(min_decoys..=upper);

    let decoy_ids: Vec<String> = (0..count)
        .map(|_| format!("botgate-decoy-{:08x}{:08x}", rng.r#gen::<u32>(), rng.r#gen::<u32>()))
        .collect();

    let mut order: Vec<String> = decoy_ids.clone();
    order.push(real_id.to_string());
    order.shuffle(rng);

    DecoyLayout {
        real_id: real_id.to_string(),
        decoy_ids,
        order,
    }
}

/// Create the decoy elements under `parent` and re-append everything in the
/// shuffled order. The real container must already exist.
pub fn apply(page: &dyn HostPage, parent: &str, layout: &DecoyLayout) {
    for id in &layout.decoy_ids {
        page.create_container(parent, id, true);
    }
    page.reorder_children(parent, &layout.order);
}

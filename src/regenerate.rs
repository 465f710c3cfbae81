//! Regeneration controller: decides when a derived image's files are rebuilt.
//!
//! ```text
//!            created / forced / hash or crop changed
//!   Absent ─────────────────────────────────────────▶ Generating ──▶ Ready
//!                                                          ▲            │
//!                                                          └────────────┘
//!                                              hash or crop changed, forced
//! ```
//!
//! Every rebuild dispatches the same two-stage chain: one crop task per
//! breakpoint, then one width-series task per breakpoint. The second stage
//! reads the files the first one wrote, so it only starts when the whole first
//! stage succeeded.
//!
//! Deletion removes the derived image's file tree whatever the state.

use crate::breakpoint::Breakpoints;
use crate::naming::PathLayout;
use crate::queue::{Batch, Chain, ChainOutcome, Routing, Task, TaskQueue};
use crate::records::{DerivedImage, RecordId, SourceImage};
use crate::storage::{Disks, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Fields whose change invalidates the generated files.
const REGENERATING_FIELDS: [&str; 2] = ["crop_data", "context_configuration_hash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Absent,
    Generating,
    Ready,
}

/// What a transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regeneration {
    Dispatched(ChainOutcome),
    /// Nothing relevant changed.
    Skipped,
}

impl Regeneration {
    pub fn was_dispatched(&self) -> bool {
        matches!(self, Regeneration::Dispatched(_))
    }
}

pub struct RegenerationController {
    queue: Arc<dyn TaskQueue>,
    disks: Disks,
    layout: PathLayout,
    breakpoints: Breakpoints,
    routing: Routing,
    states: Mutex<HashMap<RecordId, AssetState>>,
}

impl RegenerationController {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        disks: Disks,
        layout: PathLayout,
        breakpoints: Breakpoints,
        routing: Routing,
    ) -> Self {
        Self {
            queue,
            disks,
            layout,
            breakpoints,
            routing,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, image: RecordId) -> AssetState {
        self.lock_states()
            .get(&image)
            .copied()
            .unwrap_or(AssetState::Absent)
    }

    /// Crop stage then width-series stage, one task per breakpoint each.
    pub fn build_chain(&self, image: &DerivedImage) -> Chain {
        let keys: Vec<String> = self.breakpoints.keys().map(str::to_string).collect();
        let crops = keys
            .iter()
            .map(|bp| Task::CropBreakpoint {
                image: image.id,
                breakpoint: bp.clone(),
            })
            .collect();
        let widths = keys
            .into_iter()
            .map(|breakpoint| Task::ResponsiveWidths {
                image: image.id,
                breakpoint,
            })
            .collect();
        Chain::new(
            vec![Batch::new(crops), Batch::new(widths)],
            self.routing.clone(),
        )
    }

    /// A new derived image: clear anything left at its path and generate.
    pub fn on_created(
        &self,
        image: &DerivedImage,
        source: &SourceImage,
    ) -> Result<Regeneration, StorageError> {
        self.delete_files(image, source)?;
        Ok(self.dispatch(image))
    }

    /// A saved derived image: regenerate only when the crop or the context
    /// configuration changed.
    pub fn on_updated(&self, image: &DerivedImage, changed_fields: &[&str]) -> Regeneration {
        let relevant = changed_fields
            .iter()
            .any(|field| REGENERATING_FIELDS.contains(field));
        if !relevant {
            tracing::debug!(derived = %image.uuid, ?changed_fields, "regeneration skipped");
            return Regeneration::Skipped;
        }
        self.dispatch(image)
    }

    /// Operator-requested rebuild. `purge` deletes the existing files first.
    pub fn force(
        &self,
        image: &DerivedImage,
        source: &SourceImage,
        purge: bool,
    ) -> Result<Regeneration, StorageError> {
        if purge {
            self.delete_files(image, source)?;
        }
        Ok(self.dispatch(image))
    }

    pub fn on_deleted(&self, image: &DerivedImage, source: &SourceImage) -> Result<(), StorageError> {
        self.delete_files(image, source)?;
        self.lock_states().remove(&image.id);
        tracing::info!(derived = %image.uuid, "derived files deleted");
        Ok(())
    }

    /// Record the result of a chain that ran after dispatch returned.
    pub fn finish(&self, image: RecordId, outcome: &ChainOutcome) {
        let state = match outcome {
            ChainOutcome::Completed => AssetState::Ready,
            ChainOutcome::Pending => AssetState::Generating,
            ChainOutcome::Failed { .. } | ChainOutcome::Cancelled { .. } => AssetState::Absent,
        };
        self.lock_states().insert(image, state);
    }

    fn dispatch(&self, image: &DerivedImage) -> Regeneration {
        let chain = self.build_chain(image);
        self.lock_states().insert(image.id, AssetState::Generating);
        tracing::info!(
            derived = %image.uuid,
            chain = %chain.id,
            tasks = chain.task_count(),
            "regeneration dispatched"
        );
        let outcome = self.queue.dispatch(chain);
        self.finish(image.id, &outcome);
        Regeneration::Dispatched(outcome)
    }

    fn delete_files(&self, image: &DerivedImage, source: &SourceImage) -> Result<(), StorageError> {
        let disk = self.disks.get(image.disk_or(source))?;
        disk.delete_tree(
            &self
                .layout
                .derived_dir(&source.uuid_str(), &image.uuid_str()),
        )
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<RecordId, AssetState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::RecordingRunner;
    use crate::queue::{DeferredQueue, SyncQueue, TaskRunner};
    use crate::records::OwnerRef;
    use crate::storage::{BlobStore, LocalDisk};
    use crate::types::{CropData, uniform_crop_data};
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn source() -> SourceImage {
        SourceImage {
            id: 1,
            uuid: Uuid::new_v4(),
            disk: "public".into(),
            name: "photo".into(),
            extension: "jpg".into(),
            mime_type: "image/jpeg".into(),
            width: 1200,
            height: 800,
            size: 10,
            alt_text: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
            conversions: BTreeMap::new(),
        }
    }

    fn image() -> DerivedImage {
        DerivedImage {
            id: 7,
            uuid: Uuid::new_v4(),
            owner: OwnerRef::new("post", "1", "images"),
            source_image_id: 1,
            context: "hero".into(),
            context_configuration_hash: "h1".into(),
            sort_order: 0,
            disk: None,
            crop_data: uniform_crop_data(&Breakpoints::default(), None),
            alt_text: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        disk: Arc<LocalDisk>,
        runner: Arc<RecordingRunner>,
        controller: RegenerationController,
    }

    fn fixture_with(runner: RecordingRunner) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let disk = Arc::new(LocalDisk::new("public", tmp.path(), "/storage"));
        let runner = Arc::new(runner);
        let queue = Arc::new(SyncQueue::new(runner.clone(), 2).unwrap());
        let controller = RegenerationController::new(
            queue,
            Disks::new("public").with(disk.clone()),
            PathLayout::new("image-library"),
            Breakpoints::default(),
            Routing::default(),
        );
        Fixture {
            _tmp: tmp,
            disk,
            runner,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingRunner::default())
    }

    fn derived_file(src: &SourceImage, img: &DerivedImage, name: &str) -> String {
        format!("image-library/{}/{}/{}", src.uuid, img.uuid, name)
    }

    #[test]
    fn chain_has_crop_stage_then_width_stage() {
        let f = fixture();
        let chain = f.controller.build_chain(&image());
        assert_eq!(chain.stages.len(), 2);
        assert_eq!(chain.stages[0].tasks.len(), 5);
        assert!(chain.stages[0]
            .tasks
            .iter()
            .all(|t| matches!(t, Task::CropBreakpoint { image: 7, .. })));
        assert!(chain.stages[1]
            .tasks
            .iter()
            .all(|t| matches!(t, Task::ResponsiveWidths { image: 7, .. })));
    }

    #[test]
    fn creation_clears_stray_files_and_generates() {
        let f = fixture();
        let (src, img) = (source(), image());
        f.disk.put(&derived_file(&src, &img, "stray.jpg"), b"x").unwrap();

        let result = f.controller.on_created(&img, &src).unwrap();

        assert_eq!(result, Regeneration::Dispatched(ChainOutcome::Completed));
        assert!(!f.disk.exists(&derived_file(&src, &img, "stray.jpg")).unwrap());
        assert_eq!(f.runner.ran().len(), 10);
        assert_eq!(f.controller.state(img.id), AssetState::Ready);
    }

    #[test]
    fn crop_change_regenerates() {
        let f = fixture();
        let before = image();
        let mut after = before.clone();
        after
            .crop_data
            .insert("sm".into(), Some(CropData::at(100, 100, 0, 0)));

        let result = f.controller.on_updated(&after, &after.changed_fields(&before));
        assert!(result.was_dispatched());
        assert_eq!(f.runner.ran().len(), 10);
    }

    #[test]
    fn hash_change_regenerates() {
        let f = fixture();
        let result = f
            .controller
            .on_updated(&image(), &["context_configuration_hash"]);
        assert!(result.was_dispatched());
    }

    #[test]
    fn unrelated_change_is_skipped() {
        let f = fixture();
        let before = image();
        let mut after = before.clone();
        after.sort_order = 3;

        let result = f.controller.on_updated(&after, &after.changed_fields(&before));
        assert_eq!(result, Regeneration::Skipped);
        assert!(f.runner.ran().is_empty());
        assert_eq!(f.controller.state(after.id), AssetState::Absent);
    }

    #[test]
    fn failed_crop_stage_leaves_assets_absent() {
        let f = fixture_with(RecordingRunner::failing(vec![Task::CropBreakpoint {
            image: 7,
            breakpoint: "md".into(),
        }]));
        let result = f.controller.on_created(&image(), &source()).unwrap();
        assert!(matches!(
            result,
            Regeneration::Dispatched(ChainOutcome::Failed { stage: 0, .. })
        ));
        assert_eq!(f.controller.state(7), AssetState::Absent);
        // no width-series task ran
        assert!(f
            .runner
            .ran()
            .iter()
            .all(|t| matches!(t, Task::CropBreakpoint { .. })));
    }

    #[test]
    fn force_with_purge_deletes_first() {
        let f = fixture();
        let (src, img) = (source(), image());
        f.disk.put(&derived_file(&src, &img, "sm_w999.jpg"), b"x").unwrap();

        f.controller.force(&img, &src, false).unwrap();
        assert!(f.disk.exists(&derived_file(&src, &img, "sm_w999.jpg")).unwrap());

        f.controller.force(&img, &src, true).unwrap();
        assert!(!f.disk.exists(&derived_file(&src, &img, "sm_w999.jpg")).unwrap());
        assert_eq!(f.runner.ran().len(), 20);
    }

    #[test]
    fn deletion_removes_tree_in_any_state() {
        let f = fixture();
        let (src, img) = (source(), image());
        f.disk.put(&derived_file(&src, &img, "sm.jpg"), b"x").unwrap();
        f.disk
            .put(&format!("image-library/{}/original.jpg", src.uuid), b"o")
            .unwrap();

        f.controller.on_deleted(&img, &src).unwrap();

        assert!(!f.disk.exists(&derived_file(&src, &img, "sm.jpg")).unwrap());
        // the source original is untouched
        assert!(f
            .disk
            .exists(&format!("image-library/{}/original.jpg", src.uuid))
            .unwrap());
    }

    #[test]
    fn deferred_queue_keeps_state_generating() {
        let tmp = TempDir::new().unwrap();
        let runner: Arc<dyn TaskRunner> = Arc::new(RecordingRunner::default());
        let queue = Arc::new(DeferredQueue::new(runner, 1).unwrap());
        let controller = RegenerationController::new(
            queue.clone(),
            Disks::new("public").with(Arc::new(LocalDisk::new("public", tmp.path(), "/s"))),
            PathLayout::new("image-library"),
            Breakpoints::default(),
            Routing::default(),
        );
        let img = image();
        controller.on_created(&img, &source()).unwrap();
        assert_eq!(controller.state(img.id), AssetState::Generating);

        let (_, outcome) = queue.run_next().unwrap();
        controller.finish(img.id, &outcome);
        assert_eq!(controller.state(img.id), AssetState::Ready);
    }
}

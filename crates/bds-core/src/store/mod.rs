// ── Reactive stores ──
//
// Keyed entity storage with push-based change notification, shared by the
// feature services.

mod collection;

pub use collection::EntityCollection;

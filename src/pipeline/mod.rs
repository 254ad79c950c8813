//! Pipeline stages for one validation attempt.
//!
//! Each submodule implements exactly one step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ hierarchy ──▶ codes ──▶ validate
//! (path/URL/key) (spans)  (levels)    (labels)  (report)
//!                  │
//!                  └──▶ layout ──▶ snapshot ──▶ encode
//!                      (per page)  (render, store, commit)
//! ```
//!
//! 1. [`input`]: resolve the task source to a local PDF
//! 2. [`extract`]: spans to positioned [`Block`](crate::model::Block)s; any
//!    unreadable page aborts the attempt
//! 3. [`hierarchy`]: outline levels 1–4 from font-size and indent tiers; needs
//!    the whole document's blocks before classifying any of them
//! 4. [`codes`]: occupation-code detection and forward label association
//! 5. [`layout`]: per-page header/footer/column/table/font aggregates
//! 6. [`validate`]: standard, enhanced and strict reports
//! 7. [`snapshot`]: page rasters, thumbnails, one atomic commit per task
//!
//! Steps 2–7 up to rendering are blocking and run in `spawn_blocking`.

pub mod codes;
pub mod encode;
pub mod extract;
pub mod hierarchy;
pub mod input;
pub mod layout;
pub mod snapshot;
pub mod validate;

pub mod frame;

pub use frame::{Flag, FrameEvent, TrackedBox};

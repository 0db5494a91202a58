//! Render target management module
//!
//! Target sets group the attachments one rendering purpose draws into
//! (primary view, shadow atlas, post-process) and are rebuilt whenever a
//! layout-affecting setting changes.

mod frame_target_set;
mod frame_targets;
mod shadow_atlas;

pub use frame_target_set::{
    FrameTargetSet, TargetSetState, PrimaryLayout, PrimaryScope, Presentation, ResolveMask,
    PRIMARY_COLOR_FORMAT,
};
pub use frame_targets::{
    FrameTargets, PRIMARY, SHADOW_ATLAS, SHADOW_STENCIL, POST_PROCESS, POST_PROCESS_FORMAT,
};
pub use shadow_atlas::{ShadowAtlas, ShadowPage};

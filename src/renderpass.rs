// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! [`RenderPassAccessContext`]: the per-renderpass driver that owns one [`AccessContext`] per
//! subpass, links them along the subpass-dependency DAG, and sequences layout-transition/
//! load/store/resolve operations as the application begins, advances and ends a render pass.
//! [`DynamicRenderingInfo`] reuses the same subpass-0-only machinery for the
//! `vkCmdBeginRendering`-style path, which has no precompiled subpass-dependency graph.

use crate::access::{SyncAccessIndex, SyncOrdering};
use crate::barrier::SyncBarrier;
use crate::context::{AccessContext, AccessContextArena, AsyncReference, ContextId, TrackBack};
use crate::error::SyncValidationError;
use crate::hazard::{BarrierHazardDetector, HazardDetectorWithOrdering, HazardResult};
use crate::queue::{QueueFlags, QueueId};
use crate::range_map::{AccessRange, RangeGen, RangeGenerator};
use crate::settings::SyncValidatorSettings;
use crate::tag::{ResourceUsageTag, ResourceUsageTagEx};
use ash::vk;
use tracing::trace;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
    None,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
    None,
}

/// Which aspect(s) of an attachment's image format a [`AttachmentDescription`] describes — drives
/// which [`SyncAccessIndex`] load/store operations resolve to and which of
/// [`AttachmentViewGen`]'s range generators apply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachmentType {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

/// An opaque, shim-assigned image layout value. This crate never interprets a layout beyond
/// comparing it for equality (a transition is "old != new"); the layout's meaning is entirely the
/// API-under-validation's concern.
pub type ImageLayout = u32;

/// One render pass attachment's load/store behavior and layout bookkeeping. `first_subpass`/
/// `last_subpass` are precomputed by [`RenderPassDescription::new`] from the subpass attachment
/// references, matching the original's per-attachment "first and last use" tracking used to decide
/// where layout transitions and final-store validation happen.
#[derive(Clone, Debug)]
pub struct AttachmentDescription {
    pub attachment_type: AttachmentType,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
    pub first_subpass: Option<u32>,
    pub last_subpass: Option<u32>,
}

/// A reference to one attachment from within a subpass, with the layout it's used in during that
/// subpass.
#[derive(Copy, Clone, Debug)]
pub struct AttachmentRef {
    pub attachment: u32,
    pub layout: ImageLayout,
}

#[derive(Clone, Debug, Default)]
pub struct SubpassDescription {
    pub input_attachments: Vec<AttachmentRef>,
    pub color_attachments: Vec<Option<AttachmentRef>>,
    pub resolve_attachments: Vec<Option<AttachmentRef>>,
    pub depth_stencil_attachment: Option<AttachmentRef>,
    pub depth_stencil_resolve_attachment: Option<AttachmentRef>,
}

/// A subpass dependency edge. `None` for `src_subpass`/`dst_subpass` means `VK_SUBPASS_EXTERNAL`.
#[derive(Copy, Clone, Debug)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub barrier: SyncBarrier,
}

/// The renderpass-wide description the shim hands in: attachment list, subpass list, and the
/// dependency edges between them. Treated as immutable for the lifetime of one
/// [`RenderPassAccessContext`].
#[derive(Clone, Debug)]
pub struct RenderPassDescription {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassDescription {
    /// Builds a description, computing each attachment's `first_subpass`/`last_subpass` from the
    /// subpass attachment references (the original's per-attachment first/last-use bookkeeping,
    /// folded into construction rather than kept as a parallel table).
    pub fn new(mut attachments: Vec<AttachmentDescription>, subpasses: Vec<SubpassDescription>, dependencies: Vec<SubpassDependency>) -> Self {
        for (index, attachment) in attachments.iter_mut().enumerate() {
            let index = index as u32;
            for (subpass_index, subpass) in subpasses.iter().enumerate() {
                if subpass_references(subpass, index) {
                    let subpass_index = subpass_index as u32;
                    attachment.first_subpass = Some(attachment.first_subpass.map_or(subpass_index, |f| f.min(subpass_index)));
                    attachment.last_subpass = Some(attachment.last_subpass.map_or(subpass_index, |l| l.max(subpass_index)));
                }
            }
        }
        RenderPassDescription { attachments, subpasses, dependencies }
    }

    fn dependencies_into(&self, dst_subpass: u32) -> impl Iterator<Item = &SubpassDependency> {
        self.dependencies.iter().filter(move |d| d.dst_subpass == Some(dst_subpass))
    }
}

fn subpass_references(subpass: &SubpassDescription, attachment: u32) -> bool {
    subpass.input_attachments.iter().any(|r| r.attachment == attachment)
        || subpass.color_attachments.iter().flatten().any(|r| r.attachment == attachment)
        || subpass.resolve_attachments.iter().flatten().any(|r| r.attachment == attachment)
        || subpass.depth_stencil_attachment.map_or(false, |r| r.attachment == attachment)
        || subpass.depth_stencil_resolve_attachment.map_or(false, |r| r.attachment == attachment)
}

/// The layout `attachment` is used in within `subpass`, if referenced there at all.
fn attachment_layout_in_subpass(subpass: &SubpassDescription, attachment: u32) -> Option<ImageLayout> {
    if let Some(r) = subpass.input_attachments.iter().find(|r| r.attachment == attachment) {
        return Some(r.layout);
    }
    if let Some(r) = subpass.color_attachments.iter().flatten().find(|r| r.attachment == attachment) {
        return Some(r.layout);
    }
    if let Some(r) = subpass.depth_stencil_attachment.filter(|r| r.attachment == attachment) {
        return Some(r.layout);
    }
    None
}

/// The four range generators one attachment contributes, standing in for the original's
/// `AttachmentViewGen::Gen` enum (`kViewSubresource`, `kRenderArea`, `kDepthOnlyRenderArea`,
/// `kStencilOnlyRenderArea`). The shim is expected to have already flattened the attachment's
/// image view and the renderpass's render area into these; depth/stencil-only generators are
/// `None` for attachments that don't carry that aspect.
#[derive(Clone, Debug)]
pub struct AttachmentViewGen {
    pub view_subresource: RangeGen,
    pub render_area: RangeGen,
    pub depth_only_render_area: Option<RangeGen>,
    pub stencil_only_render_area: Option<RangeGen>,
}

impl AttachmentViewGen {
    pub fn new(view_subresource: RangeGen, render_area: RangeGen) -> Self {
        AttachmentViewGen { view_subresource, render_area, depth_only_render_area: None, stencil_only_render_area: None }
    }

    pub fn with_depth_stencil(mut self, depth_only: RangeGen, stencil_only: RangeGen) -> Self {
        self.depth_only_render_area = Some(depth_only);
        self.stencil_only_render_area = Some(stencil_only);
        self
    }

    /// The generator load/store operations against `attachment_type` actually walk: a combined
    /// depth/stencil attachment whose aspects have separate store ops must drive each aspect's own
    /// generator rather than the shared render area, per the sequencing this type exists to drive.
    fn generator_for(&self, attachment_type: AttachmentType, aspect: Aspect) -> Option<RangeGen> {
        match (attachment_type, aspect) {
            (AttachmentType::DepthStencil, Aspect::Depth) => self.depth_only_render_area.clone(),
            (AttachmentType::DepthStencil, Aspect::Stencil) => self.stencil_only_render_area.clone(),
            _ => Some(self.render_area.clone()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Aspect {
    Combined,
    Depth,
    Stencil,
}

/// Maps a load op to the access it performs: `LOAD_OP_LOAD` reads, `CLEAR`/`DONT_CARE` write (the
/// contents are replaced regardless of what was there), `NONE` touches nothing.
fn load_usage(load_op: LoadOp, attachment_type: AttachmentType) -> Option<SyncAccessIndex> {
    match (load_op, attachment_type) {
        (LoadOp::None, _) => None,
        (LoadOp::Load, AttachmentType::Color) => Some(SyncAccessIndex::ColorAttachmentRead),
        (_, AttachmentType::Color) => Some(SyncAccessIndex::ColorAttachmentWrite),
        (LoadOp::Load, _) => Some(SyncAccessIndex::DepthStencilAttachmentRead),
        (_, _) => Some(SyncAccessIndex::DepthStencilAttachmentWrite),
    }
}

/// Maps a store op to the access it performs: `STORE_OP_NONE` touches nothing, otherwise a write
/// (late fragment tests for depth/stencil, color-attachment-output for color).
fn store_usage(store_op: StoreOp, attachment_type: AttachmentType) -> Option<SyncAccessIndex> {
    match (store_op, attachment_type) {
        (StoreOp::None, _) => None,
        (_, AttachmentType::Color) => Some(SyncAccessIndex::ColorAttachmentWrite),
        (_, _) => Some(SyncAccessIndex::LateFragmentTestsDepthStencilWrite),
    }
}

fn ordering_for(attachment_type: AttachmentType) -> SyncOrdering {
    match attachment_type {
        AttachmentType::Color => SyncOrdering::ColorAttachment,
        AttachmentType::Depth | AttachmentType::Stencil | AttachmentType::DepthStencil => SyncOrdering::DepthStencilAttachment,
    }
}

/// The per-renderpass driver. Owns one [`AccessContext`] per subpass in its own
/// [`AccessContextArena`] — the arena's lifetime is exactly this render pass instance, the
/// subpass-DAG generalization of the arena-indices discipline `crate::context` establishes.
pub struct RenderPassAccessContext {
    description: RenderPassDescription,
    arena: AccessContextArena,
    subpasses: Vec<ContextId>,
    attachment_views: Vec<AttachmentViewGen>,
    current_subpass: u32,
}

impl RenderPassAccessContext {
    /// Creates one [`AccessContext`] per subpass, wiring up `prev` trackbacks from every
    /// dependency that targets it (or, for `VK_SUBPASS_EXTERNAL` sources, from `external_context`).
    /// Subpasses are totally ordered regardless of declared dependencies, so every subpass that
    /// has no explicit dependency on its immediate predecessor still gets a trackback to it with
    /// an empty-scope barrier — the predecessor's state is still reachable, but nothing covers it,
    /// so a conflicting access is reported exactly as "declared a dependency too narrow to help."
    pub fn new(
        description: RenderPassDescription,
        queue_flags: QueueFlags,
        attachment_views: Vec<AttachmentViewGen>,
        external_context: Option<&AccessContext>,
    ) -> Self {
        let _ = queue_flags;
        let mut arena = AccessContextArena::new();

        let external_id = external_context.map(|external| {
            let mut snapshot = AccessContext::new();
            snapshot.init_from(external);
            arena.insert(snapshot)
        });

        let subpass_ids: Vec<ContextId> = (0..description.subpasses.len()).map(|_| arena.insert(AccessContext::new())).collect();

        for (subpass_index, &dst_id) in subpass_ids.iter().enumerate() {
            let subpass_index = subpass_index as u32;
            let mut has_immediate_predecessor_edge = subpass_index == 0;
            for dependency in description.dependencies_into(subpass_index) {
                let source = match dependency.src_subpass {
                    Some(src) => Some(subpass_ids[src as usize]),
                    None => external_id,
                };
                if let Some(source) = source {
                    let track_back = TrackBack { source, barrier: dependency.barrier, queue_id: QueueId::INVALID };
                    arena.get_mut(dst_id).add_prev(track_back, dependency.src_subpass.map(|s| s as usize));
                }
                if dependency.src_subpass == Some(subpass_index - 1) {
                    has_immediate_predecessor_edge = true;
                }
            }
            if !has_immediate_predecessor_edge {
                let track_back = TrackBack {
                    source: subpass_ids[subpass_index as usize - 1],
                    barrier: SyncBarrier::default(),
                    queue_id: QueueId::INVALID,
                };
                arena.get_mut(dst_id).add_prev(track_back, Some(subpass_index as usize - 1));
            }
        }

        RenderPassAccessContext { description, arena, subpasses: subpass_ids, attachment_views, current_subpass: 0 }
    }

    pub fn current_subpass(&self) -> u32 {
        self.current_subpass
    }

    pub fn current_context(&self) -> &AccessContext {
        self.arena.get(self.subpasses[self.current_subpass as usize])
    }

    /// The arena owning every subpass context plus (if any) the external-context snapshot. Needed
    /// alongside [`current_context`](Self::current_context) by callers that query hazards
    /// directly against it, since [`AccessContext::detect_hazard_range`] recurses into `prev`
    /// trackbacks that only resolve against this exact arena.
    pub fn arena(&self) -> &AccessContextArena {
        &self.arena
    }

    pub fn render_pass_description(&self) -> &RenderPassDescription {
        &self.description
    }

    fn subpass_context(&self, subpass: u32) -> &AccessContext {
        self.arena.get(self.subpasses[subpass as usize])
    }

    /// Runs `f` against the `subpass`th context with the rest of the arena available for
    /// predecessor resolution. The context is temporarily taken out of the arena (replaced with an
    /// empty placeholder) for the duration of the call: [`AccessContext::record_access`] needs
    /// both `&mut self` on the context being recorded into and `&AccessContextArena` to resolve its
    /// own `prev` trackbacks, and those can't be live simultaneously if the context is still held
    /// inside the same arena it's borrowed from.
    fn with_subpass_removed<R>(&mut self, subpass: u32, f: impl FnOnce(&mut AccessContext, &AccessContextArena) -> R) -> R {
        let id = self.subpasses[subpass as usize];
        let mut context = std::mem::take(self.arena.get_mut(id));
        let result = f(&mut context, &self.arena);
        *self.arena.get_mut(id) = context;
        result
    }

    /// Walks every attachment first used in `subpass`, detecting a layout-transition hazard
    /// against whatever accesses are already on record for it. Transitions are validated/recorded
    /// as if they occurred at the very start of the subpass that first needs the new layout.
    fn validate_layout_transitions(&self, subpass: u32) -> HazardResult {
        let context = self.subpass_context(subpass);
        let subpass_desc = &self.description.subpasses[subpass as usize];
        for (attachment_index, attachment) in self.description.attachments.iter().enumerate() {
            if attachment.first_subpass != Some(subpass) {
                continue;
            }
            let attachment_index = attachment_index as u32;
            let Some(target_layout) = attachment_layout_in_subpass(subpass_desc, attachment_index) else { continue };
            if target_layout == attachment.initial_layout {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_index as usize) else { continue };
            let hazard = detect_layout_transition_hazard(context, &self.arena, view.view_subresource.clone());
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn record_layout_transitions(&mut self, subpass: u32, tag: ResourceUsageTag) {
        let attachments = self.description.attachments.clone();
        let subpass_desc = self.description.subpasses[subpass as usize].clone();
        let views = self.attachment_views.clone();
        self.with_subpass_removed(subpass, |context, arena| {
            for (attachment_index, attachment) in attachments.iter().enumerate() {
                if attachment.first_subpass != Some(subpass) {
                    continue;
                }
                let attachment_index = attachment_index as u32;
                let Some(target_layout) = attachment_layout_in_subpass(&subpass_desc, attachment_index) else { continue };
                if target_layout == attachment.initial_layout {
                    continue;
                }
                let Some(view) = views.get(attachment_index as usize) else { continue };
                context.record_access(arena, view.view_subresource.clone(), SyncAccessIndex::ImageLayoutTransition, ResourceUsageTagEx::from(tag), QueueId::INVALID);
            }
        });
    }

    /// Validates every attachment's load operation against render area (or, for depth/stencil,
    /// each aspect's own render area), using the ordering rule the attachment type implies so
    /// same-subpass writes to disjoint pixels are not spuriously reported.
    fn validate_load_operations(&self, subpass: u32, settings: &SyncValidatorSettings) -> HazardResult {
        let context = self.subpass_context(subpass);
        let description = &self.description.subpasses[subpass as usize];
        for attachment_ref in subpass_attachment_refs(description) {
            let Some(attachment) = self.description.attachments.get(attachment_ref.attachment as usize) else { continue };
            if attachment.first_subpass != Some(subpass) {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_ref.attachment as usize) else { continue };
            let hazard = validate_one_load(context, &self.arena, view, attachment, settings);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn record_load_operations(&mut self, subpass: u32, tag: ResourceUsageTag) {
        let attachments = self.description.attachments.clone();
        let views = self.attachment_views.clone();
        let description = self.description.subpasses[subpass as usize].clone();
        self.with_subpass_removed(subpass, |context, arena| {
            for attachment_ref in subpass_attachment_refs(&description) {
                let Some(attachment) = attachments.get(attachment_ref.attachment as usize) else { continue };
                if attachment.first_subpass != Some(subpass) {
                    continue;
                }
                let Some(view) = views.get(attachment_ref.attachment as usize) else { continue };
                record_one_load(context, arena, view, attachment, tag);
            }
        });
    }

    /// Called once, at `vkCmdBeginRenderPass`: validates/records subpass 0's layout transitions
    /// and load operations.
    pub fn validate_begin_render_pass(&self, settings: &SyncValidatorSettings) -> HazardResult {
        let hazard = self.validate_layout_transitions(0);
        if hazard.is_hazard() {
            return hazard;
        }
        self.validate_load_operations(0, settings)
    }

    pub fn record_begin_render_pass(&mut self, transition_tag: ResourceUsageTag, load_tag: ResourceUsageTag) {
        trace!(subpass = 0, "record begin render pass");
        self.record_layout_transitions(0, transition_tag);
        self.record_load_operations(0, load_tag);
        self.current_subpass = 0;
    }

    /// Resolve + store for the current subpass, then the next subpass's layout transitions and
    /// load operations.
    pub fn validate_next_subpass(&self, settings: &SyncValidatorSettings) -> HazardResult {
        let hazard = self.validate_resolve_operations(self.current_subpass, settings);
        if hazard.is_hazard() {
            return hazard;
        }
        let hazard = self.validate_store_operations(self.current_subpass, settings);
        if hazard.is_hazard() {
            return hazard;
        }
        let next = self.current_subpass + 1;
        if next >= self.description.subpasses.len() as u32 {
            return HazardResult::none();
        }
        let hazard = self.validate_layout_transitions(next);
        if hazard.is_hazard() {
            return hazard;
        }
        self.validate_load_operations(next, settings)
    }

    /// Fails with [`SyncValidationError::SubpassIndexOutOfRange`] rather than advancing past the
    /// render pass's last subpass — a shim issuing one `vkCmdNextSubpass` too many is malformed
    /// input, not a condition this crate can silently absorb the way [`validate_next_subpass`]
    /// does (there, "no next subpass" just means "nothing further to check").
    pub fn record_next_subpass(
        &mut self,
        store_tag: ResourceUsageTag,
        barrier_tag: ResourceUsageTag,
        load_tag: ResourceUsageTag,
    ) -> Result<(), SyncValidationError> {
        let subpass_count = self.description.subpasses.len() as u32;
        let next = self.current_subpass + 1;
        if next >= subpass_count {
            return Err(SyncValidationError::SubpassIndexOutOfRange { index: next, subpass_count });
        }
        self.record_resolve_operations(self.current_subpass, store_tag);
        self.record_store_operations(self.current_subpass, store_tag);
        self.current_subpass = next;
        trace!(subpass = self.current_subpass, "record next subpass");
        self.record_layout_transitions(self.current_subpass, barrier_tag);
        self.record_load_operations(self.current_subpass, load_tag);
        Ok(())
    }

    pub fn validate_end_render_pass(&self, settings: &SyncValidatorSettings) -> HazardResult {
        let hazard = self.validate_resolve_operations(self.current_subpass, settings);
        if hazard.is_hazard() {
            return hazard;
        }
        let hazard = self.validate_store_operations(self.current_subpass, settings);
        if hazard.is_hazard() {
            return hazard;
        }
        self.validate_final_layout_transitions()
    }

    /// Resolves/stores the final subpass, folds every subpass context into `external_context` via
    /// `resolve_access_range_recurse_prev`, then applies the subpass-to-external layout
    /// transitions directly against `external_context`.
    pub fn record_end_render_pass(&mut self, external_context: &mut AccessContext, store_tag: ResourceUsageTag, barrier_tag: ResourceUsageTag) {
        self.record_resolve_operations(self.current_subpass, store_tag);
        self.record_store_operations(self.current_subpass, store_tag);
        trace!(subpass = self.current_subpass, "record end render pass");

        for &subpass_id in &self.subpasses {
            let source = self.arena.get(subpass_id);
            let dest_count = external_context.global_barrier_count();
            source.resolve_access_range_recurse_prev(&self.arena, AccessRange::full(), external_context.access_map_mut(), dest_count);
        }

        for (attachment_index, attachment) in self.description.attachments.clone().iter().enumerate() {
            let Some(last_subpass) = attachment.last_subpass else { continue };
            let subpass_desc = &self.description.subpasses[last_subpass as usize];
            let Some(source_layout) = attachment_layout_in_subpass(subpass_desc, attachment_index as u32) else { continue };
            if source_layout == attachment.final_layout {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_index) else { continue };
            external_context.record_access(
                &AccessContextArena::new(),
                view.view_subresource.clone(),
                SyncAccessIndex::ImageLayoutTransition,
                ResourceUsageTagEx::from(barrier_tag),
                QueueId::INVALID,
            );
        }
    }

    fn validate_final_layout_transitions(&self) -> HazardResult {
        let context = self.subpass_context(self.current_subpass);
        let subpass_desc = &self.description.subpasses[self.current_subpass as usize];
        for (attachment_index, attachment) in self.description.attachments.iter().enumerate() {
            if attachment.last_subpass != Some(self.current_subpass) {
                continue;
            }
            let attachment_index = attachment_index as u32;
            let Some(source_layout) = attachment_layout_in_subpass(subpass_desc, attachment_index) else { continue };
            if source_layout == attachment.final_layout {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_index as usize) else { continue };
            let hazard = detect_layout_transition_hazard(context, &self.arena, view.view_subresource.clone());
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn validate_resolve_operations(&self, subpass: u32, settings: &SyncValidatorSettings) -> HazardResult {
        let context = self.subpass_context(subpass);
        let description = &self.description.subpasses[subpass as usize];
        for (color_index, resolve) in description.resolve_attachments.iter().enumerate() {
            let (Some(resolve_ref), Some(Some(source_ref))) = (resolve, description.color_attachments.get(color_index)) else { continue };
            let hazard = validate_resolve_pair(context, &self.arena, &self.attachment_views, *source_ref, *resolve_ref, settings);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        if let (Some(source_ref), Some(resolve_ref)) = (description.depth_stencil_attachment, description.depth_stencil_resolve_attachment) {
            let hazard = validate_resolve_pair(context, &self.arena, &self.attachment_views, source_ref, resolve_ref, settings);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn record_resolve_operations(&mut self, subpass: u32, tag: ResourceUsageTag) {
        let description = self.description.subpasses[subpass as usize].clone();
        let views = self.attachment_views.clone();
        self.with_subpass_removed(subpass, |context, arena| {
            for (color_index, resolve) in description.resolve_attachments.iter().enumerate() {
                let (Some(resolve_ref), Some(Some(source_ref))) = (resolve, description.color_attachments.get(color_index)) else { continue };
                record_resolve_pair(context, arena, &views, *source_ref, *resolve_ref, tag);
            }
            if let (Some(source_ref), Some(resolve_ref)) = (description.depth_stencil_attachment, description.depth_stencil_resolve_attachment) {
                record_resolve_pair(context, arena, &views, source_ref, resolve_ref, tag);
            }
        });
    }

    fn validate_store_operations(&self, subpass: u32, settings: &SyncValidatorSettings) -> HazardResult {
        let context = self.subpass_context(subpass);
        let description = &self.description.subpasses[subpass as usize];
        for attachment_ref in subpass_attachment_refs(description) {
            let Some(attachment) = self.description.attachments.get(attachment_ref.attachment as usize) else { continue };
            if attachment.last_subpass != Some(subpass) {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_ref.attachment as usize) else { continue };
            let hazard = validate_one_store(context, &self.arena, view, attachment, settings);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn record_store_operations(&mut self, subpass: u32, tag: ResourceUsageTag) {
        let attachments = self.description.attachments.clone();
        let views = self.attachment_views.clone();
        let description = self.description.subpasses[subpass as usize].clone();
        self.with_subpass_removed(subpass, |context, arena| {
            for attachment_ref in subpass_attachment_refs(&description) {
                let Some(attachment) = attachments.get(attachment_ref.attachment as usize) else { continue };
                if attachment.last_subpass != Some(subpass) {
                    continue;
                }
                let Some(view) = views.get(attachment_ref.attachment as usize) else { continue };
                record_one_store(context, arena, view, attachment, tag);
            }
        });
    }

    /// Validates a draw command's writes to the current subpass's bound color/depth/stencil
    /// attachments against `draw_state`. The shim owns pipeline state and fragment-output
    /// reflection; this crate only needs the already-resolved per-attachment write booleans.
    pub fn validate_draw_subpass_attachment(&self, draw_state: &DrawAttachmentState) -> HazardResult {
        let context = self.current_context();
        let description = &self.description.subpasses[self.current_subpass as usize];
        for (index, attachment_ref) in description.color_attachments.iter().enumerate() {
            let Some(attachment_ref) = attachment_ref else { continue };
            if !draw_state.color_writes.get(index).copied().unwrap_or(false) {
                continue;
            }
            let Some(view) = self.attachment_views.get(attachment_ref.attachment as usize) else { continue };
            let hazard = detect_ordered_write_or_read(
                context,
                &self.arena,
                view.render_area.clone(),
                SyncAccessIndex::ColorAttachmentWrite,
                SyncOrdering::ColorAttachment,
                draw_state.load_op_after_store_op_validation,
            );
            if hazard.is_hazard() {
                return hazard;
            }
        }
        if let Some(attachment_ref) = description.depth_stencil_attachment {
            if draw_state.depth_test_enabled || draw_state.stencil_test_enabled {
                if let Some(view) = self.attachment_views.get(attachment_ref.attachment as usize) {
                    let hazard = detect_ordered_write_or_read(
                        context,
                        &self.arena,
                        view.render_area.clone(),
                        SyncAccessIndex::DepthStencilAttachmentWrite,
                        SyncOrdering::DepthStencilAttachment,
                        draw_state.load_op_after_store_op_validation,
                    );
                    if hazard.is_hazard() {
                        return hazard;
                    }
                }
            }
        }
        HazardResult::none()
    }

    pub fn record_draw_subpass_attachment(&mut self, draw_state: &DrawAttachmentState, tag: ResourceUsageTag) {
        let description = self.description.subpasses[self.current_subpass as usize].clone();
        let views = self.attachment_views.clone();
        let draw_state = draw_state.clone();
        let current_subpass = self.current_subpass;
        self.with_subpass_removed(current_subpass, |context, arena| {
            for (index, attachment_ref) in description.color_attachments.iter().enumerate() {
                let Some(attachment_ref) = attachment_ref else { continue };
                if !draw_state.color_writes.get(index).copied().unwrap_or(false) {
                    continue;
                }
                let Some(view) = views.get(attachment_ref.attachment as usize) else { continue };
                context.record_access(arena, view.render_area.clone(), SyncAccessIndex::ColorAttachmentWrite, ResourceUsageTagEx::from(tag), QueueId::INVALID);
            }
            if let Some(attachment_ref) = description.depth_stencil_attachment {
                if draw_state.depth_test_enabled || draw_state.stencil_test_enabled {
                    if let Some(view) = views.get(attachment_ref.attachment as usize) {
                        context.record_access(arena, view.render_area.clone(), SyncAccessIndex::DepthStencilAttachmentWrite, ResourceUsageTagEx::from(tag), QueueId::INVALID);
                    }
                }
            }
        });
    }

    /// Registers `peer`'s context as an async reference of every subpass context, so a render pass
    /// recorded on one queue that reads/writes resources touched by another, unbarred queue still
    /// detects the race.
    pub fn add_async_reference(&mut self, peer: ContextId, start_tag: ResourceUsageTag, queue_id: QueueId) {
        for &id in &self.subpasses {
            self.arena.get_mut(id).add_async_reference(AsyncReference { source: peer, start_tag, queue_id });
        }
    }
}

/// A minimal "current draw state" snapshot: which color attachment slots this draw writes, and
/// whether the pipeline bound has depth/stencil test enabled. The shim owns the actual pipeline
/// state and fragment-output reflection; this crate only needs the already-resolved booleans.
#[derive(Clone, Debug, Default)]
pub struct DrawAttachmentState {
    pub color_writes: Vec<bool>,
    pub depth_test_enabled: bool,
    pub stencil_test_enabled: bool,
    pub load_op_after_store_op_validation: bool,
}

fn subpass_attachment_refs(description: &SubpassDescription) -> Vec<AttachmentRef> {
    let mut refs = Vec::new();
    refs.extend(description.color_attachments.iter().flatten().copied());
    if let Some(ds) = description.depth_stencil_attachment {
        refs.push(ds);
    }
    refs
}

fn detect_layout_transition_hazard(context: &AccessContext, arena: &AccessContextArena, mut range_gen: RangeGen) -> HazardResult {
    let detector = BarrierHazardDetector::new(context, SyncAccessIndex::ImageLayoutTransition, vk::PipelineStageFlags2::empty(), vk::AccessFlags2::empty());
    loop {
        let range = range_gen.next_range();
        if range.is_empty() {
            break;
        }
        let hazard = context.detect_hazard_range(arena, range, &|_r, s| detector.detect(s));
        if hazard.is_hazard() {
            return hazard;
        }
    }
    HazardResult::none()
}

fn detect_ordered_write_or_read(
    context: &AccessContext,
    arena: &AccessContextArena,
    mut range_gen: RangeGen,
    index: SyncAccessIndex,
    ordering: SyncOrdering,
    load_op_after_store_op_validation: bool,
) -> HazardResult {
    let detector = HazardDetectorWithOrdering::new(index, ordering, context, Default::default(), load_op_after_store_op_validation);
    loop {
        let range = range_gen.next_range();
        if range.is_empty() {
            break;
        }
        let hazard = context.detect_hazard_range(arena, range, &|_r, s| detector.detect(s));
        if hazard.is_hazard() {
            return hazard;
        }
    }
    HazardResult::none()
}

fn validate_one_load(context: &AccessContext, arena: &AccessContextArena, view: &AttachmentViewGen, attachment: &AttachmentDescription, settings: &SyncValidatorSettings) -> HazardResult {
    for (aspect, load_op) in load_aspects(attachment) {
        let Some(index) = load_usage(load_op, attachment.attachment_type) else { continue };
        let Some(range_gen) = view.generator_for(attachment.attachment_type, aspect) else { continue };
        let hazard = detect_ordered_write_or_read(context, arena, range_gen, index, ordering_for(attachment.attachment_type), settings.load_op_after_store_op_validation);
        if hazard.is_hazard() {
            return hazard;
        }
    }
    HazardResult::none()
}

fn load_aspects(attachment: &AttachmentDescription) -> Vec<(Aspect, LoadOp)> {
    match attachment.attachment_type {
        AttachmentType::DepthStencil => vec![(Aspect::Depth, attachment.load_op), (Aspect::Stencil, attachment.stencil_load_op)],
        _ => vec![(Aspect::Combined, attachment.load_op)],
    }
}

fn store_aspects(attachment: &AttachmentDescription) -> Vec<(Aspect, StoreOp)> {
    match attachment.attachment_type {
        AttachmentType::DepthStencil => vec![(Aspect::Depth, attachment.store_op), (Aspect::Stencil, attachment.stencil_store_op)],
        _ => vec![(Aspect::Combined, attachment.store_op)],
    }
}

fn record_one_load(context: &mut AccessContext, arena: &AccessContextArena, view: &AttachmentViewGen, attachment: &AttachmentDescription, tag: ResourceUsageTag) {
    for (aspect, load_op) in load_aspects(attachment) {
        let Some(index) = load_usage(load_op, attachment.attachment_type) else { continue };
        let Some(range_gen) = view.generator_for(attachment.attachment_type, aspect) else { continue };
        context.record_access(arena, range_gen, index, ResourceUsageTagEx::from(tag), QueueId::INVALID);
    }
}

fn validate_one_store(context: &AccessContext, arena: &AccessContextArena, view: &AttachmentViewGen, attachment: &AttachmentDescription, settings: &SyncValidatorSettings) -> HazardResult {
    let _ = settings;
    for (aspect, store_op) in store_aspects(attachment) {
        let Some(index) = store_usage(store_op, attachment.attachment_type) else { continue };
        let Some(range_gen) = view.generator_for(attachment.attachment_type, aspect) else { continue };
        let hazard = detect_ordered_write_or_read(context, arena, range_gen, index, ordering_for(attachment.attachment_type), true);
        if hazard.is_hazard() {
            return hazard;
        }
    }
    HazardResult::none()
}

fn record_one_store(context: &mut AccessContext, arena: &AccessContextArena, view: &AttachmentViewGen, attachment: &AttachmentDescription, tag: ResourceUsageTag) {
    for (aspect, store_op) in store_aspects(attachment) {
        let Some(index) = store_usage(store_op, attachment.attachment_type) else { continue };
        let Some(range_gen) = view.generator_for(attachment.attachment_type, aspect) else { continue };
        context.record_access(arena, range_gen, index, ResourceUsageTagEx::from(tag), QueueId::INVALID);
    }
}

fn validate_resolve_pair(
    context: &AccessContext,
    arena: &AccessContextArena,
    views: &[AttachmentViewGen],
    source: AttachmentRef,
    dest: AttachmentRef,
    settings: &SyncValidatorSettings,
) -> HazardResult {
    let _ = settings;
    let Some(source_view) = views.get(source.attachment as usize) else { return HazardResult::none() };
    let Some(dest_view) = views.get(dest.attachment as usize) else { return HazardResult::none() };

    let hazard = detect_ordered_write_or_read(context, arena, source_view.render_area.clone(), SyncAccessIndex::ColorAttachmentRead, SyncOrdering::ColorAttachment, true);
    if hazard.is_hazard() {
        return hazard;
    }
    detect_ordered_write_or_read(context, arena, dest_view.render_area.clone(), SyncAccessIndex::ColorAttachmentWrite, SyncOrdering::ColorAttachment, true)
}

fn record_resolve_pair(context: &mut AccessContext, arena: &AccessContextArena, views: &[AttachmentViewGen], source: AttachmentRef, dest: AttachmentRef, tag: ResourceUsageTag) {
    if let Some(view) = views.get(source.attachment as usize) {
        context.record_access(arena, view.render_area.clone(), SyncAccessIndex::ColorAttachmentRead, ResourceUsageTagEx::from(tag), QueueId::INVALID);
    }
    if let Some(view) = views.get(dest.attachment as usize) {
        context.record_access(arena, view.render_area.clone(), SyncAccessIndex::ColorAttachmentWrite, ResourceUsageTagEx::from(tag), QueueId::INVALID);
    }
}

/// The `vkCmdBeginRendering`-style path (`VK_KHR_dynamic_rendering`): a begin/end scope without a
/// precompiled [`RenderPassDescription`], built directly from the begin command's attachment
/// list. It shares [`RenderPassAccessContext`]'s machinery restricted to exactly one subpass with
/// no dependency graph — a dynamic-rendering scope never has subpass dependencies to wire up, only
/// the render-pass-external trackback.
pub struct DynamicRenderingInfo {
    pub attachments: Vec<DynamicAttachment>,
}

/// One dynamic-rendering attachment: its load/store behavior, type, and the range generator
/// covering it, plus whether it carries a separate resolve target.
#[derive(Clone, Debug)]
pub struct DynamicAttachment {
    pub attachment_type: AttachmentType,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub view_gen: AttachmentViewGen,
    pub has_resolve: bool,
}

impl DynamicRenderingInfo {
    pub fn new(attachments: Vec<DynamicAttachment>) -> Self {
        DynamicRenderingInfo { attachments }
    }

    /// Builds the degenerate one-subpass [`RenderPassDescription`] the dynamic-rendering path
    /// reduces to, so it can reuse [`RenderPassAccessContext`] unmodified.
    pub fn into_render_pass(self) -> (RenderPassDescription, Vec<AttachmentViewGen>) {
        let mut attachments = Vec::new();
        let mut views = Vec::new();
        let mut color_attachments = Vec::new();
        let mut resolve_attachments = Vec::new();
        let mut depth_stencil_attachment = None;

        for (index, dynamic) in self.attachments.into_iter().enumerate() {
            let index = index as u32;
            attachments.push(AttachmentDescription {
                attachment_type: dynamic.attachment_type,
                load_op: dynamic.load_op,
                store_op: dynamic.store_op,
                stencil_load_op: LoadOp::None,
                stencil_store_op: StoreOp::None,
                initial_layout: 0,
                final_layout: 0,
                first_subpass: Some(0),
                last_subpass: Some(0),
            });
            views.push(dynamic.view_gen);
            match dynamic.attachment_type {
                AttachmentType::Color => {
                    color_attachments.push(Some(AttachmentRef { attachment: index, layout: 0 }));
                    resolve_attachments.push(dynamic.has_resolve.then_some(AttachmentRef { attachment: index, layout: 0 }));
                }
                _ => depth_stencil_attachment = Some(AttachmentRef { attachment: index, layout: 0 }),
            }
        }

        let subpass = SubpassDescription {
            input_attachments: Vec::new(),
            color_attachments,
            resolve_attachments,
            depth_stencil_attachment,
            depth_stencil_resolve_attachment: None,
        };
        (RenderPassDescription::new(attachments, vec![subpass], Vec::new()), views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::SyncExecScope;
    use crate::range_map::AccessRange;

    fn color_attachment(load_op: LoadOp, store_op: StoreOp) -> AttachmentDescription {
        AttachmentDescription {
            attachment_type: AttachmentType::Color,
            load_op,
            store_op,
            stencil_load_op: LoadOp::None,
            stencil_store_op: StoreOp::None,
            initial_layout: 0,
            final_layout: 0,
            first_subpass: None,
            last_subpass: None,
        }
    }

    fn two_subpass_description(dependencies: Vec<SubpassDependency>) -> RenderPassDescription {
        let attachments = vec![color_attachment(LoadOp::Clear, StoreOp::Store)];
        let subpasses = vec![
            SubpassDescription { color_attachments: vec![Some(AttachmentRef { attachment: 0, layout: 1 })], ..Default::default() },
            SubpassDescription { input_attachments: vec![AttachmentRef { attachment: 0, layout: 1 }], ..Default::default() },
        ];
        RenderPassDescription::new(attachments, subpasses, dependencies)
    }

    fn attachment_views() -> Vec<AttachmentViewGen> {
        vec![AttachmentViewGen::new(RangeGen::single(AccessRange::new(0, 64)), RangeGen::single(AccessRange::new(0, 64)))]
    }

    #[test]
    fn first_and_last_subpass_are_computed_from_attachment_refs() {
        let rp = two_subpass_description(Vec::new());
        assert_eq!(rp.attachments[0].first_subpass, Some(0));
        assert_eq!(rp.attachments[0].last_subpass, Some(1));
    }

    #[test]
    fn begin_render_pass_records_clear_as_a_write() {
        let rp = two_subpass_description(Vec::new());
        let mut ctx = RenderPassAccessContext::new(rp, QueueFlags::GRAPHICS, attachment_views(), None);
        assert!(!ctx.validate_begin_render_pass(&SyncValidatorSettings::default()).is_hazard());
        ctx.record_begin_render_pass(ResourceUsageTag::new(0), ResourceUsageTag::new(1));

        let (_, state) = ctx.current_context().access_map().get(&AccessRange::new(0, 64)).unwrap();
        assert!(state.last_writes.iter().any(|w| w.index == SyncAccessIndex::ColorAttachmentWrite));
    }

    /// A second subpass reading an attachment the first subpass wrote hazards unless a subpass
    /// dependency barriers the write into the read's stage.
    #[test]
    fn subpass_dependency_prevents_hazard_on_next_subpass_read() {
        let dependency = SubpassDependency {
            src_subpass: Some(0),
            dst_subpass: Some(1),
            barrier: SyncBarrier::new(
                SyncExecScope::make_src(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
                SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::INPUT_ATTACHMENT_READ),
            ),
        };
        let rp = two_subpass_description(vec![dependency]);
        let mut ctx = RenderPassAccessContext::new(rp, QueueFlags::GRAPHICS, attachment_views(), None);
        ctx.record_begin_render_pass(ResourceUsageTag::new(0), ResourceUsageTag::new(1));
        ctx.record_next_subpass(ResourceUsageTag::new(2), ResourceUsageTag::new(3), ResourceUsageTag::new(4)).unwrap();

        let hazard = ctx.current_context().detect_hazard_range(ctx.arena(), AccessRange::new(0, 64), &|_r, s| s.detect_hazard(SyncAccessIndex::InputAttachmentRead));
        assert!(!hazard.is_hazard());
    }

    #[test]
    fn missing_subpass_dependency_still_hazards_on_next_subpass_read() {
        let rp = two_subpass_description(Vec::new());
        let mut ctx = RenderPassAccessContext::new(rp, QueueFlags::GRAPHICS, attachment_views(), None);
        ctx.record_begin_render_pass(ResourceUsageTag::new(0), ResourceUsageTag::new(1));
        ctx.record_next_subpass(ResourceUsageTag::new(2), ResourceUsageTag::new(3), ResourceUsageTag::new(4)).unwrap();

        let hazard = ctx.current_context().detect_hazard_range(ctx.arena(), AccessRange::new(0, 64), &|_r, s| s.detect_hazard(SyncAccessIndex::InputAttachmentRead));
        assert!(hazard.is_hazard());
    }

    #[test]
    fn next_subpass_past_the_last_subpass_is_a_recoverable_error() {
        let rp = two_subpass_description(Vec::new());
        let mut ctx = RenderPassAccessContext::new(rp, QueueFlags::GRAPHICS, attachment_views(), None);
        ctx.record_begin_render_pass(ResourceUsageTag::new(0), ResourceUsageTag::new(1));
        ctx.record_next_subpass(ResourceUsageTag::new(2), ResourceUsageTag::new(3), ResourceUsageTag::new(4)).unwrap();

        let err = ctx.record_next_subpass(ResourceUsageTag::new(5), ResourceUsageTag::new(6), ResourceUsageTag::new(7)).unwrap_err();
        assert_eq!(err, SyncValidationError::SubpassIndexOutOfRange { index: 2, subpass_count: 2 });
        // current_subpass must not have advanced past the last valid subpass.
        assert_eq!(ctx.current_subpass(), 1);
    }
}

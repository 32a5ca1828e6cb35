// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Stage/access vocabulary: [`SyncAccessIndex`], [`SyncOrdering`] and the ordering-guarantee
//! table consulted by the "ordered" family of hazard detectors.

use ash::vk;
use bitflags::bitflags;
use lazy_static::lazy_static;
use std::collections::HashMap;

bitflags! {
    /// Per-access modifiers that change hazard-detection behavior without changing the
    /// stage/access pair itself (e.g. "this is an input-attachment read" that participates in
    /// render-pass self-dependency bookkeeping).
    #[derive(Default)]
    pub struct SyncFlags: u32 {
        const NONE = 0;
        const INPUT_ATTACHMENT_READ = 1 << 0;
    }
}

/// Whether an access index describes a read or a write, for hazard classification purposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Enumerates every stage+access-mask combination this crate tracks. The full Vulkan table has
/// hundreds of entries; we carry a representative subset spanning transfer, draw, compute, host
/// and dynamic-rendering attachment accesses plus an explicit catch-all, since implementing the
/// complete enumeration is squarely "executing/implementing the API", which is out of scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SyncAccessIndex {
    TransferRead,
    TransferWrite,
    VertexShaderRead,
    FragmentShaderRead,
    ComputeShaderRead,
    ComputeShaderWrite,
    ColorAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilAttachmentRead,
    DepthStencilAttachmentWrite,
    LateFragmentTestsDepthStencilWrite,
    InputAttachmentRead,
    HostRead,
    HostWrite,
    IndirectCommandRead,
    IndexInputRead,
    ImageLayoutTransition,
    /// Extension or as-yet-unmodeled access; conservative (treated as a read+write union by the
    /// detectors) when `shader_accesses_heuristic` is enabled (see
    /// [`crate::settings::SyncValidatorSettings`]).
    Unknown,
}

/// Immutable metadata describing one [`SyncAccessIndex`]: its execution stage(s), access
/// mask(s), and read/write kind. Looked up once per detection via a static table (mirrors the
/// original's `GetAccessInfo`), avoiding per-call heap allocation.
#[derive(Copy, Clone, Debug)]
pub struct SyncAccessInfo {
    pub index: SyncAccessIndex,
    pub kind: AccessKind,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

fn make_info(
    index: SyncAccessIndex,
    kind: AccessKind,
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
) -> SyncAccessInfo {
    SyncAccessInfo { index, kind, stage, access }
}

lazy_static! {
    static ref ACCESS_INFO_TABLE: HashMap<SyncAccessIndex, SyncAccessInfo> = {
        use vk::AccessFlags2 as A;
        use vk::PipelineStageFlags2 as S;
        let mut m = HashMap::new();
        let mut add = |info: SyncAccessInfo| {
            m.insert(info.index, info);
        };
        add(make_info(SyncAccessIndex::TransferRead, AccessKind::Read, S::TRANSFER, A::TRANSFER_READ));
        add(make_info(SyncAccessIndex::TransferWrite, AccessKind::Write, S::TRANSFER, A::TRANSFER_WRITE));
        add(make_info(SyncAccessIndex::VertexShaderRead, AccessKind::Read, S::VERTEX_SHADER, A::SHADER_READ));
        add(make_info(SyncAccessIndex::FragmentShaderRead, AccessKind::Read, S::FRAGMENT_SHADER, A::SHADER_READ));
        add(make_info(SyncAccessIndex::ComputeShaderRead, AccessKind::Read, S::COMPUTE_SHADER, A::SHADER_READ));
        add(make_info(SyncAccessIndex::ComputeShaderWrite, AccessKind::Write, S::COMPUTE_SHADER, A::SHADER_WRITE));
        add(make_info(
            SyncAccessIndex::ColorAttachmentRead,
            AccessKind::Read,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ,
        ));
        add(make_info(
            SyncAccessIndex::ColorAttachmentWrite,
            AccessKind::Write,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
        ));
        add(make_info(
            SyncAccessIndex::DepthStencilAttachmentRead,
            AccessKind::Read,
            S::EARLY_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ,
        ));
        add(make_info(
            SyncAccessIndex::DepthStencilAttachmentWrite,
            AccessKind::Write,
            S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ));
        add(make_info(
            SyncAccessIndex::LateFragmentTestsDepthStencilWrite,
            AccessKind::Write,
            S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ));
        add(make_info(
            SyncAccessIndex::InputAttachmentRead,
            AccessKind::Read,
            S::FRAGMENT_SHADER,
            A::INPUT_ATTACHMENT_READ,
        ));
        add(make_info(SyncAccessIndex::HostRead, AccessKind::Read, S::HOST, A::HOST_READ));
        add(make_info(SyncAccessIndex::HostWrite, AccessKind::Write, S::HOST, A::HOST_WRITE));
        add(make_info(
            SyncAccessIndex::IndirectCommandRead,
            AccessKind::Read,
            S::DRAW_INDIRECT,
            A::INDIRECT_COMMAND_READ,
        ));
        add(make_info(SyncAccessIndex::IndexInputRead, AccessKind::Read, S::INDEX_INPUT, A::INDEX_READ));
        add(make_info(
            SyncAccessIndex::ImageLayoutTransition,
            AccessKind::Write,
            S::ALL_COMMANDS,
            A::MEMORY_WRITE,
        ));
        add(make_info(SyncAccessIndex::Unknown, AccessKind::Write, S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE));
        m
    };
}

/// Looks up the static metadata for `index`. Infallible: every variant is populated at startup.
pub fn get_access_info(index: SyncAccessIndex) -> &'static SyncAccessInfo {
    ACCESS_INFO_TABLE
        .get(&index)
        .expect("SyncAccessIndex table is exhaustively populated")
}

/// A per-access-class hint that certain stage/access pairs are implicitly ordered by the API
/// itself (e.g. two color-attachment writes to the same render area in the same subpass are
/// ordered by rasterization order) and therefore must not be reported as hazards even without an
/// explicit barrier between them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOrdering {
    None,
    ColorAttachment,
    DepthStencilAttachment,
    Raster,
}

/// The stage/access scope that [`SyncOrdering`] guarantees is already ordered with respect to
/// the access being recorded or detected.
#[derive(Copy, Clone, Debug, Default)]
pub struct OrderingBarrier {
    pub exec_scope: vk::PipelineStageFlags2,
    pub access_scope: vk::AccessFlags2,
}

/// Returns the ordering guarantee for `rule`. `None` carries an empty scope, meaning "no
/// implicit ordering — fall back to plain hazard detection".
pub fn get_ordering_rules(rule: SyncOrdering) -> OrderingBarrier {
    use vk::AccessFlags2 as A;
    use vk::PipelineStageFlags2 as S;
    match rule {
        SyncOrdering::None => OrderingBarrier::default(),
        SyncOrdering::ColorAttachment => OrderingBarrier {
            exec_scope: S::COLOR_ATTACHMENT_OUTPUT,
            access_scope: A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        },
        SyncOrdering::DepthStencilAttachment => OrderingBarrier {
            exec_scope: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            access_scope: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        },
        SyncOrdering::Raster => OrderingBarrier {
            exec_scope: S::COLOR_ATTACHMENT_OUTPUT | S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            access_scope: A::COLOR_ATTACHMENT_READ
                | A::COLOR_ATTACHMENT_WRITE
                | A::DEPTH_STENCIL_ATTACHMENT_READ
                | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_info_lookup_matches_kind() {
        let info = get_access_info(SyncAccessIndex::TransferWrite);
        assert_eq!(info.kind, AccessKind::Write);
        let info = get_access_info(SyncAccessIndex::TransferRead);
        assert_eq!(info.kind, AccessKind::Read);
    }

    #[test]
    fn none_ordering_has_empty_scope() {
        let ordering = get_ordering_rules(SyncOrdering::None);
        assert!(ordering.exec_scope.is_empty());
        assert!(ordering.access_scope.is_empty());
    }
}

// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Validator-wide configuration knobs. Serialization is explicitly out of scope; the shim is
//! expected to build this from whatever configuration surface it exposes.

/// Tunables threaded through detectors that need to know how strict to be about cases the core
/// otherwise can't resolve precisely (missing descriptor-binding info, renderpass load/store
/// ordering).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncValidatorSettings {
    /// Whether a subpass's load operation is checked against the previous subpass's store
    /// operation for the same attachment (a load-after-store hazard). Some applications
    /// deliberately rely on undefined contents and disable this.
    pub load_op_after_store_op_validation: bool,
    /// When a shader access can't be resolved to an exact descriptor binding, treat it as
    /// touching the whole bound range (conservative) rather than skipping it.
    pub shader_accesses_heuristic: bool,
}

impl Default for SyncValidatorSettings {
    fn default() -> Self {
        SyncValidatorSettings {
            load_op_after_store_op_validation: true,
            shader_accesses_heuristic: true,
        }
    }
}

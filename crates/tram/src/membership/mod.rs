// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Repair-tree membership: member ids, per-member state and the group view
//! of a node.

mod group;
mod mask;
mod member;

pub use group::{CeilingChange, GroupTree, NodeStates};
pub use mask::{MaskSnapshot, MemberId, MembershipMask};
pub use member::{Cstate, HeadInfo, Hstate, Lstate, Member, Mrole};

// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Hash primitives shared by the quoting and the verifying side.

mod algorithms;
pub use algorithms::*;

pub mod pcr;
pub use pcr::{PcrError, PcrHashValue};

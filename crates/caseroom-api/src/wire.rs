// SPDX-License-Identifier: Apache-2.0

//! The server-sent-event wire frames of the relay. One delta frame per
//! upstream delta, verbatim, plus a single terminal error frame on
//! failure. There is no end-of-stream sentinel; closure terminates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaFrame {
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorFrame {
    pub error: String,
}

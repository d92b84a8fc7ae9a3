/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! ICAP-specific framing on top of [`crate::wire`]: the `Encapsulated:`
//! offset table and the embedded HTTP sub-message parsers that use it.

pub mod encapsulated;
pub mod http;
pub mod parser;

pub use encapsulated::{Encapsulated, EncapsulatedPart};
pub use parser::{find_preamble_end, IcapPreamble, IcapResponsePreamble};

// SPDX-License-Identifier: Apache-2.0

//! Shared utilities

pub mod ptr;

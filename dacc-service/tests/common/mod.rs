// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

// SPDX-License-Identifier: GPL-3.0-only

//! Burst buffer directives embedded in a job script

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::capacity::parse_size;

const JOB_DIRECTIVE: &str = "#DW jobdw";
const PERSISTENT_DIRECTIVE: &str = "#DW persistentdw";

/// Buffer request parsed from `#DW` lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Per job buffer size in bytes, when a `jobdw` line is present
    pub capacity_bytes: Option<u64>,
    pub pool: Option<String>,
    pub access_mode: String,
    pub buffer_type: String,

    /// Persistent buffers the job attaches to
    pub persistent_buffers: Vec<String>,
}

impl JobRequest {
    pub fn parse(script: &str) -> Result<Self> {
        let mut request = JobRequest::default();

        for line in script.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix(JOB_DIRECTIVE) {
                for (key, value) in directive_pairs(rest)? {
                    match key {
                        "capacity" => {
                            if let Some((pool, size)) = value.split_once(':') {
                                request.pool = Some(pool.to_string());
                                request.capacity_bytes = Some(parse_size(size)?);
                            } else {
                                request.capacity_bytes = Some(parse_size(value)?);
                            }
                        }
                        "pool" => request.pool = Some(value.to_string()),
                        "access_mode" => request.access_mode = value.to_string(),
                        "type" => request.buffer_type = value.to_string(),
                        _ => {}
                    }
                }
                if request.capacity_bytes.is_none() {
                    return Err(anyhow!("jobdw directive is missing capacity"));
                }
            } else if let Some(rest) = line.strip_prefix(PERSISTENT_DIRECTIVE) {
                for (key, value) in directive_pairs(rest)? {
                    if key == "name" {
                        request.persistent_buffers.push(value.to_string());
                    }
                }
            }
        }

        Ok(request)
    }
}

fn directive_pairs(rest: &str) -> Result<Vec<(&str, &str)>> {
    rest.split_whitespace()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| anyhow!("Invalid directive argument: {}", pair))
        })
        .collect()
}

/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use std::io::Write;

use crate::whippet::error::KlfmResult;

/// Where run reports go: straight to stdout, or into a caller-owned buffer
/// for tests and batch drivers that collect one report per run.
pub enum OutputDestination<'a> {
    Stdout,
    Buffer(&'a mut Vec<u8>),
}

/// Line-oriented sink for the engine's human-readable reporting.
pub struct Output<'a> {
    destination: OutputDestination<'a>,
}

impl Output<'static> {
    pub fn stdout() -> Self {
        Output {
            destination: OutputDestination::Stdout,
        }
    }
}

impl<'a> Output<'a> {
    pub fn buffer(buffer: &'a mut Vec<u8>) -> Output<'a> {
        Output {
            destination: OutputDestination::Buffer(buffer),
        }
    }

    pub fn print(&mut self, text: &str) -> KlfmResult<()> {
        match &mut self.destination {
            OutputDestination::Stdout => println!("{}", text),
            OutputDestination::Buffer(buffer) => {
                buffer.write_all(text.as_bytes())?;
                buffer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    /// Writes a labeled per-resource fraction vector the way run logs
    /// display imbalance and resource-ratio data.
    pub fn print_fraction_vector(&mut self, label: &str, fractions: &[f64]) -> KlfmResult<()> {
        let formatted: Vec<String> = fractions.iter().map(|f| format!("{:.4}", f)).collect();
        self.print(&format!("{}: {}", label, formatted.join(" ")))
    }
}

//! Testing utilities for SDE workspace
//!
//! Shared fixtures, event recorders and diff helpers.

#![allow(missing_docs)]

use parking_lot::Mutex;
use sde_buffer::{DiffOperation, EngineEvent, EventSink, TextBuffer};

/// Sink that keeps every event for later assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Event names in emission order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(EngineEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

/// `"line 1\nline 2\n…line n\n"`
pub fn numbered_text(n: usize) -> String {
    (1..=n).map(|i| format!("line {i}\n")).collect()
}

pub fn numbered_buffer(n: usize) -> TextBuffer {
    TextBuffer::from_text(&numbered_text(n))
}

/// Build a diff from a kind name: `insert`, `replace`, `delete` or `modify`
pub fn diff(kind: &str, start: usize, end: usize, content: &str) -> DiffOperation {
    match kind {
        "insert" => DiffOperation::insert(start, content),
        "replace" => DiffOperation::replace(start, end, content),
        "delete" => DiffOperation::delete(start, end),
        "modify" => DiffOperation::modify(start, end, content),
        other => panic!("unknown diff kind {other}"),
    }
}

/// Small TypeScript module with an exported helper used further down
pub const SAMPLE_TS: &str = "\
import { readFile } from 'fs';
import { join } from 'path';

export function helper(a: number): number {
  return a + 1;
}

export interface Options {
  name: string;
  verbose?: boolean;
}

export function run(opts: Options): number {
  return helper(opts.name.length);
}
";

/// Small Rust module with a public helper used by `run`
pub const SAMPLE_RS: &str = "\
use std::fmt;

pub struct Config {
    pub name: String,
    pub retries: u32,
}

pub fn helper(x: u32) -> u32 {
    x + 1
}

pub fn run(config: &Config) -> u32 {
    helper(config.retries)
}
";

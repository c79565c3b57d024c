//! Request and response types of the symbolication API.
//!
//! A request consists of one or more [`Job`]s. Each job declares a memory map, the ordered list of
//! modules loaded in a process, and a list of stacks. Every frame of a stack references a module
//! by its index into the memory map and carries an offset relative to that module:
//!
//! ```json
//! {
//!   "jobs": [{
//!     "memoryMap": [["xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2"]],
//!     "stacks": [[[0, 11723767], [-1, 65802]]]
//!   }]
//! }
//! ```
//!
//! The result of a job is a [`JobResult`], which renders into the two response formats of the API
//! through [`JobResult::to_v4`] and [`JobResult::to_v5`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use symbolic_common::ModuleRef;

use crate::resolver::{ModuleStatus, ResolvedFrame};

/// A frame to symbolicate, given as `[moduleIndex, offset]`.
///
/// A negative module index marks a frame that does not belong to any module.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct StackFrame {
    /// Index into the memory map of the job.
    pub module_index: i64,
    /// Offset relative to the start of the module.
    pub offset: u64,
}

/// A single symbolication job.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Job {
    /// Modules referenced by the stacks, duplicates allowed.
    #[serde(rename = "memoryMap")]
    pub memory_map: Vec<ModuleRef>,
    /// Stacks to symbolicate.
    pub stacks: Vec<Vec<StackFrame>>,
}

impl Job {
    /// Returns the total number of frames in all stacks.
    pub fn frame_count(&self) -> usize {
        self.stacks.iter().map(Vec::len).sum()
    }
}

/// Body of a v5 request.
#[derive(Clone, Debug, Deserialize)]
pub struct V5Request {
    /// The jobs of this batch.
    pub jobs: Vec<Job>,
}

/// Body of a v4 request.
///
/// Legacy clients send a single job inline, optionally with a `version` field. Batches use the
/// `jobs` form shared with v5.
#[derive(Clone, Debug, Deserialize)]
pub struct V4Request {
    /// The jobs of a batch request.
    pub jobs: Option<Vec<Job>>,
    /// The memory map of an inline job.
    #[serde(rename = "memoryMap")]
    pub memory_map: Option<Vec<ModuleRef>>,
    /// The stacks of an inline job.
    pub stacks: Option<Vec<Vec<StackFrame>>>,
    /// The protocol version, which must be `4` if given.
    pub version: Option<u32>,
}

/// A frame after symbolication, together with the input it was resolved from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolicatedFrame {
    /// Index into the memory map as given in the request.
    pub module_index: i64,
    /// Offset relative to the start of the module.
    pub module_offset: u64,
    /// The module the frame belongs to, if the index is valid.
    pub module: Option<ModuleRef>,
    /// The resolution of the frame.
    pub resolved: ResolvedFrame,
}

impl SymbolicatedFrame {
    /// Renders the frame as a string in the v4 format.
    ///
    /// Resolved frames show the symbol name, followed by the distance from the start of the
    /// symbol unless the offset hits the symbol exactly. Everything else shows the raw offset.
    pub fn to_v4_string(&self) -> String {
        match self.resolved {
            ResolvedFrame::Resolved {
                ref name,
                offset: 0,
                ..
            } => name.clone(),
            ResolvedFrame::Resolved {
                ref name, offset, ..
            } => format!("{name} (+{offset:#x})"),
            ResolvedFrame::UnknownOffset { raw_offset } => format!("{raw_offset:#x}"),
            ResolvedFrame::Unknown => format!("{:#x}", self.module_offset),
        }
    }
}

/// The result of a symbolication job, shared by both response formats.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobResult {
    /// The memory map of the job.
    pub memory_map: Vec<ModuleRef>,
    /// The load status of each memory map entry, in memory map order.
    pub module_statuses: Vec<ModuleStatus>,
    /// The symbolicated stacks in request order.
    pub stacks: Vec<Vec<SymbolicatedFrame>>,
}

impl JobResult {
    /// Renders this result in the v4 format.
    pub fn to_v4(&self) -> V4JobResult {
        V4JobResult {
            symbolicated_stacks: self
                .stacks
                .iter()
                .map(|stack| stack.iter().map(SymbolicatedFrame::to_v4_string).collect())
                .collect(),
            known_modules: self
                .module_statuses
                .iter()
                .map(|status| status.is_found())
                .collect(),
        }
    }

    /// Renders this result in the v5 format.
    pub fn to_v5(&self) -> V5JobResult {
        let stacks = self
            .stacks
            .iter()
            .map(|stack| {
                stack
                    .iter()
                    .enumerate()
                    .map(|(index, frame)| V5Frame::new(index, frame))
                    .collect()
            })
            .collect();

        let found_modules = self
            .memory_map
            .iter()
            .zip(&self.module_statuses)
            .map(|(module, status)| (module.to_string(), status.is_found()))
            .collect();

        V5JobResult {
            stacks,
            found_modules,
        }
    }
}

/// A job result in the v4 format.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct V4JobResult {
    /// One string per frame, see [`SymbolicatedFrame::to_v4_string`].
    #[serde(rename = "symbolicatedStacks")]
    pub symbolicated_stacks: Vec<Vec<String>>,
    /// Whether symbols were available for each memory map entry.
    #[serde(rename = "knownModules")]
    pub known_modules: Vec<bool>,
}

/// Body of a v4 response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum V4Response {
    /// Response to an inline job.
    Job(V4JobResult),
    /// Response to a batch request, one result per job.
    Batch {
        /// Results in job order.
        results: Vec<V4JobResult>,
    },
}

/// The resolution status of a v5 frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    /// The frame was resolved to a symbol.
    Resolved,
    /// The module has symbols, but none covers the offset.
    UnknownOffset,
    /// The frame has no module or the module has no symbols.
    UnknownModule,
}

/// A frame in the v5 format.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct V5Frame {
    /// Position of the frame in its stack.
    pub frame: usize,
    /// Module-relative offset as hex string.
    pub module_offset: String,
    /// The debug file name of the module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Index into the memory map as given in the request.
    pub module_index: i64,
    /// Name of the symbol covering the offset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Distance from the start of the symbol as hex string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_offset: Option<String>,
    /// Source file of the covering line record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number of the covering line record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    /// How the frame was resolved.
    pub status: FrameStatus,
}

impl V5Frame {
    fn new(index: usize, frame: &SymbolicatedFrame) -> Self {
        let mut v5 = V5Frame {
            frame: index,
            module_offset: format!("{:#x}", frame.module_offset),
            module: frame.module.as_ref().map(|m| m.debug_file().to_owned()),
            module_index: frame.module_index,
            function: None,
            function_offset: None,
            file: None,
            line: None,
            status: FrameStatus::UnknownModule,
        };

        match frame.resolved {
            ResolvedFrame::Resolved {
                ref name,
                offset,
                ref file,
                line,
            } => {
                v5.function = Some(name.clone());
                v5.function_offset = Some(format!("{offset:#x}"));
                v5.file = file.clone();
                v5.line = line;
                v5.status = FrameStatus::Resolved;
            }
            ResolvedFrame::UnknownOffset { .. } => v5.status = FrameStatus::UnknownOffset,
            ResolvedFrame::Unknown => {}
        }

        v5
    }
}

/// A job result in the v5 format.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct V5JobResult {
    /// The symbolicated stacks in request order.
    pub stacks: Vec<Vec<V5Frame>>,
    /// Whether symbols were available, keyed by `<debug_file>/<debug_id>`.
    pub found_modules: IndexMap<String, bool>,
}

/// Body of a v5 response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct V5Response {
    /// Results in job order.
    pub results: Vec<V5JobResult>,
}

//! Core types for the bspgraph workflow runtime.
//!
//! This module defines the fundamental types used throughout the crate for
//! identifying nodes and channels in workflow graphs. These are the core
//! domain concepts that define what a workflow *is*.
//!
//! # Key Types
//!
//! - [`NodeKind`]: Identifies different types of nodes in a workflow graph
//! - [`ChannelName`]: the string key identifying a channel within a schema-driven state
//!
//! # Examples
//!
//! ```rust
//! use bspgraph::types::NodeKind;
//!
//! // Special workflow nodes
//! let start = NodeKind::Start;
//! let custom = NodeKind::Custom("ProcessData".to_string());
//! let end = NodeKind::End;
//!
//! // Encode for persistence
//! let encoded = custom.encode();
//! assert_eq!(encoded, "Custom:ProcessData");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the type of a node within a workflow graph.
///
/// `NodeKind` serves as a unique identifier for nodes in the workflow execution graph.
/// It provides special handling for common workflow patterns (start/end nodes) while
/// allowing arbitrary custom node types through the `Other` variant.
///
/// # Persistence
///
/// `NodeKind` supports serialization for checkpointing and persistence through both
/// serde and the [`encode`](Self::encode)/[`decode`](Self::decode) methods.
///
/// # Examples
///
/// ```rust
/// use bspgraph::types::NodeKind;
///
/// // Special workflow nodes
/// let start = NodeKind::Start;
/// let end = NodeKind::End;
///
/// // Custom application nodes
/// let processor = NodeKind::Custom("DataProcessor".to_string());
///
/// // Persistence round-trip
/// let encoded = processor.encode();
/// let decoded = NodeKind::decode(&encoded);
/// assert_eq!(processor, decoded);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Entry point node that begins workflow execution.
    ///
    /// Start nodes are virtual nodes that should not be implemented, they have no incoming edges and serve as the initial
    /// frontier for workflow execution.
    /// The first edge for each graph execution must start from a virtual Start node.
    Start,

    /// Terminal node that completes workflow execution.
    ///
    /// End nodes are virtual nodes that should not be implemented, they have no outgoing edges and signal
    /// the completion of a workflow branch.
    End,

    /// Custom node type identified by a user-defined string.
    ///
    /// The string should be descriptive and unique within the workflow.
    /// Common patterns include function names, service names, or step descriptions.
    Custom(String),
}

impl NodeKind {
    /// Encode a NodeKind into its persisted string form.
    ///
    /// The encoding format is human-readable and forward-compatible:
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `Custom("X")` → `"Custom:X"`
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bspgraph::types::NodeKind;
    /// assert_eq!(NodeKind::Start.encode(), "Start");
    /// assert_eq!(NodeKind::Custom("Processor".to_string()).encode(), "Custom:Processor");
    /// ```
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a NodeKind.
    ///
    /// This method provides forward compatibility by falling back to
    /// `Other(s)` for any unrecognized format.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bspgraph::types::NodeKind;
    /// assert_eq!(NodeKind::decode("Start"), NodeKind::Start);
    /// assert_eq!(NodeKind::decode("Custom:Processor"), NodeKind::Custom("Processor".to_string()));
    ///
    /// // Forward compatibility - unknown formats become Other
    /// assert_eq!(NodeKind::decode("Unknown"), NodeKind::Custom("Unknown".to_string()));
    /// ```
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    /// Returns `true` if this is a [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is an [`End`](Self::End) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is a custom node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

// Developer Experience: allow using string literals where a NodeKind is expected.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

/// Name of a channel within a [`crate::state::State`].
///
/// Unlike the teacher framework this type is generalized from: channels are
/// not a closed enum of three built-in kinds (message/error/extra). A
/// compiled graph's schema declares an arbitrary, user-chosen set of field
/// names, each backed by its own versioned [`crate::channel::Channel`]. The
/// well-known names `"messages"` and `"errors"` receive no special
/// treatment from the executor itself; they are simply the field names most
/// schemas happen to declare with the message/append reducers.
pub type ChannelName = String;

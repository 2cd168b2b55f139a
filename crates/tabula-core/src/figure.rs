//! Plotly-compatible figure specification.
//!
//! A [`Figure`] is plain data: traces plus a layout. Serializing it with
//! `serde_json` yields a document that Plotly front-ends render directly
//! (`{"data": [...], "layout": {...}}`).

use serde::{Deserialize, Serialize};

use crate::table::Cell;

/// A chart: an ordered list of traces and a layout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// Traces, drawn in order.
    pub data: Vec<Trace>,
    /// Titles, axes and global options.
    pub layout: Layout,
}

impl Figure {
    /// Return a copy of the figure with one more trace.
    #[must_use]
    pub fn with_trace(&self, trace: Trace) -> Self {
        let mut next = self.clone();
        next.data.push(trace);
        next
    }
}

/// Plotly trace type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Markers and/or lines.
    Scatter,
    /// Bars.
    Bar,
    /// Binned counts.
    Histogram,
    /// Box plot.
    Box,
    /// Pie chart.
    Pie,
}

/// One data series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Trace type.
    #[serde(rename = "type")]
    pub kind: TraceKind,
    /// Legend label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// X values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<Vec<Cell>>,
    /// Y values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<Cell>>,
    /// Scatter mode (`markers`, `lines`, `lines+markers`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Pie slice labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Cell>>,
    /// Pie slice values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Cell>>,
    /// Bar orientation (`v` or `h`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    /// Marker styling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
}

impl Trace {
    /// An empty trace of the given kind.
    pub fn new(kind: TraceKind) -> Self {
        Self {
            kind,
            name: None,
            x: None,
            y: None,
            mode: None,
            labels: None,
            values: None,
            orientation: None,
            marker: None,
        }
    }
}

/// Marker styling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// CSS color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A title object (`{"text": ...}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    /// Title text.
    pub text: String,
}

impl From<&str> for Title {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_owned(),
        }
    }
}

/// Axis options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Title>,
}

/// Figure layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Figure title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Title>,
    /// X axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xaxis: Option<Axis>,
    /// Y axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaxis: Option<Axis>,
    /// Bar grouping (`group`, `stack`, `overlay`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barmode: Option<String>,
    /// Legend visibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub showlegend: Option<bool>,
}

//! Figure construction verbs.

use std::sync::Arc;

use tabula_core::figure::{Axis, Marker, Title};
use tabula_core::{Cell, Figure, Trace, TraceKind};

use super::{Args, Kwargs};
use crate::errors::{ScriptError, ScriptResult};
use crate::value::Value;

fn take_text(kwargs: &mut Kwargs, key: &str, op: &str) -> ScriptResult<Option<String>> {
    kwargs
        .take(key)
        .map(|v| v.into_text(&format!("'{op}' :{key}")))
        .transpose()
}

fn take_cells(kwargs: &mut Kwargs, key: &str, op: &str) -> ScriptResult<Option<Vec<Cell>>> {
    kwargs
        .take(key)
        .map(|v| v.into_cells(&format!("'{op}' :{key}")))
        .transpose()
}

fn take_marker(kwargs: &mut Kwargs, op: &str) -> ScriptResult<Option<Marker>> {
    Ok(take_text(kwargs, "color", op)?.map(|color| Marker { color: Some(color) }))
}

fn same_length(op: &str, a: Option<&Vec<Cell>>, b: Option<&Vec<Cell>>) -> ScriptResult<()> {
    match (a, b) {
        (Some(a), Some(b)) if a.len() != b.len() => Err(ScriptError::runtime(format!(
            "'{op}' needs x and y of equal length, got {} and {}",
            a.len(),
            b.len()
        ))),
        _ => Ok(()),
    }
}

fn push_trace(figure: &Figure, trace: Trace) -> Value {
    Value::Figure(Arc::new(figure.with_trace(trace)))
}

/// `(figure :title "...")`
pub(super) fn figure(kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let mut figure = Figure::default();
    figure.layout.title = take_text(kwargs, "title", "figure")?.map(|text| Title { text });
    Ok(Value::Figure(Arc::new(figure)))
}

/// Trace types sharing the `:x`/`:y` keyword set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum XyKind {
    Scatter,
    Line,
    Bar,
}

/// `(scatter F :x X :y Y)`, `(line F ...)` and `(bar F ...)`
pub(super) fn xy_trace(args: &mut Args, kwargs: &mut Kwargs, kind: XyKind) -> ScriptResult<Value> {
    let op = match kind {
        XyKind::Scatter => "scatter",
        XyKind::Line => "line",
        XyKind::Bar => "bar",
    };
    let figure = args.next("a figure")?.into_figure(&format!("'{op}' input"))?;
    let x = take_cells(kwargs, "x", op)?;
    let y = take_cells(kwargs, "y", op)?;
    if y.is_none() {
        return Err(ScriptError::runtime(format!("'{op}' needs :y values")));
    }
    same_length(op, x.as_ref(), y.as_ref())?;

    let mut trace = Trace::new(if kind == XyKind::Bar {
        TraceKind::Bar
    } else {
        TraceKind::Scatter
    });
    trace.x = x;
    trace.y = y;
    trace.name = take_text(kwargs, "name", op)?;
    trace.marker = take_marker(kwargs, op)?;
    match kind {
        XyKind::Scatter => {
            trace.mode = Some(take_text(kwargs, "mode", op)?.unwrap_or_else(|| "markers".into()));
        }
        XyKind::Line => {
            trace.mode = Some(take_text(kwargs, "mode", op)?.unwrap_or_else(|| "lines".into()));
        }
        XyKind::Bar => {
            trace.orientation = take_text(kwargs, "orientation", op)?;
        }
    }
    Ok(push_trace(&figure, trace))
}

/// `(histogram F :x X)`
pub(super) fn histogram(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let figure = args.next("a figure")?.into_figure("'histogram' input")?;
    let mut trace = Trace::new(TraceKind::Histogram);
    trace.x = Some(
        take_cells(kwargs, "x", "histogram")?
            .ok_or_else(|| ScriptError::runtime("'histogram' needs :x values"))?,
    );
    trace.name = take_text(kwargs, "name", "histogram")?;
    trace.marker = take_marker(kwargs, "histogram")?;
    Ok(push_trace(&figure, trace))
}

/// `(box F :y Y :x groups)`
pub(super) fn box_trace(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let figure = args.next("a figure")?.into_figure("'box' input")?;
    let y = take_cells(kwargs, "y", "box")?;
    if y.is_none() {
        return Err(ScriptError::runtime("'box' needs :y values"));
    }
    let x = take_cells(kwargs, "x", "box")?;
    same_length("box", x.as_ref(), y.as_ref())?;
    let mut trace = Trace::new(TraceKind::Box);
    trace.x = x;
    trace.y = y;
    trace.name = take_text(kwargs, "name", "box")?;
    Ok(push_trace(&figure, trace))
}

/// `(pie F :labels L :values V)`
pub(super) fn pie(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let figure = args.next("a figure")?.into_figure("'pie' input")?;
    let labels = take_cells(kwargs, "labels", "pie")?
        .ok_or_else(|| ScriptError::runtime("'pie' needs :labels"))?;
    let values = take_cells(kwargs, "values", "pie")?
        .ok_or_else(|| ScriptError::runtime("'pie' needs :values"))?;
    if labels.len() != values.len() {
        return Err(ScriptError::runtime(format!(
            "'pie' needs labels and values of equal length, got {} and {}",
            labels.len(),
            values.len()
        )));
    }
    let mut trace = Trace::new(TraceKind::Pie);
    trace.labels = Some(labels);
    trace.values = Some(values);
    trace.name = take_text(kwargs, "name", "pie")?;
    Ok(push_trace(&figure, trace))
}

/// `(update-layout F :title :x-title :y-title :barmode :show-legend)`
pub(super) fn update_layout(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let figure = args.next("a figure")?.into_figure("'update-layout' input")?;
    let mut next = Figure::clone(&figure);
    let op = "update-layout";
    if let Some(text) = take_text(kwargs, "title", op)? {
        next.layout.title = Some(Title { text });
    }
    if let Some(text) = take_text(kwargs, "x-title", op)? {
        next.layout.xaxis = Some(Axis {
            title: Some(Title { text }),
        });
    }
    if let Some(text) = take_text(kwargs, "y-title", op)? {
        next.layout.yaxis = Some(Axis {
            title: Some(Title { text }),
        });
    }
    if let Some(mode) = take_text(kwargs, "barmode", op)? {
        if !matches!(mode.as_str(), "group" | "stack" | "overlay" | "relative") {
            return Err(ScriptError::runtime(format!(
                "'update-layout' :barmode must be group, stack, overlay or relative, got '{mode}'"
            )));
        }
        next.layout.barmode = Some(mode);
    }
    if let Some(show) = kwargs.take("show-legend") {
        next.layout.showlegend = Some(show.into_bool("'update-layout' :show-legend")?);
    }
    Ok(Value::Figure(Arc::new(next)))
}

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write};
use std::time::{Duration, Instant};

use crate::TaskId;
use crate::graph::Graph;

/// Timing of one task invocation.
#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Run diagnostics and performance metrics.
///
/// Returned alongside the results of every run, see
/// [`Results::diagnostics`](crate::Results::diagnostics).
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Execution metrics of every task that ran.
    pub execution_times: HashMap<TaskId, TaskExecution>,
}

impl Diagnostics {
    /// Wall-clock time between the first task start and the last task end.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// The `n` longest running tasks, longest first.
    pub fn slowest(&self, n: usize) -> Vec<(TaskId, Duration)> {
        let mut tasks: Vec<_> = self
            .execution_times
            .iter()
            .map(|(id, t)| (*id, t.duration))
            .collect();

        tasks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        tasks.truncate(n);
        tasks
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution
    /// duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Did not run
    pub fn render_mermaid<G>(&self, graph: &Graph<G>) -> String
    where
        G: Send + Sync,
    {
        let mut f = String::new();
        _ = self.write_mermaid(&mut f, graph);
        f
    }

    fn write_mermaid<G>(&self, f: &mut String, graph: &Graph<G>) -> std::fmt::Result
    where
        G: Send + Sync,
    {
        writeln!(f, "graph LR")?;

        let times = &self.execution_times;
        let (min_time, max_time) = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(None, |acc: Option<(f64, f64)>, secs| match acc {
                Some((lo, hi)) => Some((lo.min(secs), hi.max(secs))),
                None => Some((secs, secs)),
            })
            .unwrap_or((0.0, 0.0));

        // Avoid divide by zero if all tasks took same time
        let span = if (max_time - min_time).abs() < f64::EPSILON {
            1.0
        } else {
            max_time - min_time
        };

        for (id, task) in graph.tasks() {
            let name = task.name().replace('"', "\\\"");

            let (label_extra, color_code) = match times.get(&id) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / span;
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("Not run".to_string(), "#ADD8E6".to_string()), // Light Blue
            };

            writeln!(f, "    {id}[\"{name}\\n{label_extra}\"]")?;
            writeln!(f, "    style {id} fill:{color_code}")?;
        }

        for edge in graph.edges() {
            let label = edge
                .dataset
                .name()
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(f, "    {} -- \"{}\" --> {}", edge.producer, label, edge.consumer)?;
        }

        Ok(())
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn heat(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    };

    format!("#{r:02X}{g:02X}{b:02X}")
}

// WATERFALL

struct XmlSafe<'a>(&'a str);

impl Display for XmlSafe<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

const ROW_HEIGHT: u32 = 30;
const LABEL_WIDTH: u32 = 300;
const CHART_WIDTH: u32 = 800;
const PADDING: u32 = 10;
const HEADER_HEIGHT: u32 = 30;
const TEXT_SPACE: u32 = 80;

fn format_micros(micros: f64) -> String {
    if micros < 1000.0 {
        format!("{micros:.0}µs")
    } else {
        format!("{:.2}ms", micros / 1000.0)
    }
}

impl Diagnostics {
    /// Renders a waterfall chart of task execution as an SVG string.
    ///
    /// In parallel runs the bars of one level overlap.
    pub fn render_waterfall<G>(&self, graph: &Graph<G>) -> String
    where
        G: Send + Sync,
    {
        let mut ran: Vec<(TaskId, &TaskExecution)> =
            self.execution_times.iter().map(|(k, v)| (*k, v)).collect();

        let Some(global_start) = ran.iter().map(|(_, t)| t.start).min() else {
            return r#"<svg width="200" height="50" xmlns="http://www.w3.org/2000/svg"><text x="10" y="30" font-family="sans-serif">No tasks ran</text></svg>"#
                .to_string();
        };

        ran.sort_by_key(|(id, t)| (t.start, *id));

        let total_micros = self.wall_time().as_micros().max(1) as f64;

        let mut svg = String::with_capacity(ran.len() * 500);
        _ = write_header(&mut svg, ran.len());
        _ = write_grid(&mut svg, total_micros);
        _ = write_rows(&mut svg, graph, &ran, global_start, total_micros);
        svg.push_str("</svg>");

        svg
    }
}

fn write_header(buf: &mut String, rows: usize) -> std::fmt::Result {
    let w = LABEL_WIDTH + CHART_WIDTH + PADDING * 3 + TEXT_SPACE;
    let h = HEADER_HEIGHT + rows as u32 * ROW_HEIGHT + PADDING;

    let css = r#"
        .row:nth-child(even) { fill: #f9f9f9; }
        .row:nth-child(odd) { fill: #ffffff; }
        text { font-family: sans-serif; font-size: 12px; }
        .bar { fill: #3b82f6; rx: 4; }
        .label { fill: #333; }
        .time { fill: #666; font-size: 11px; }
        .grid { stroke: #e5e7eb; stroke-width: 1; }
        .axis { fill: #9ca3af; font-size: 10px; }"#;

    write!(
        buf,
        r#"<svg width="{w}" height="{h}" xmlns="http://www.w3.org/2000/svg"><style>{css}</style><rect width="100%" height="100%" fill="white" />"#
    )
}

fn write_grid(buf: &mut String, total_micros: f64) -> std::fmt::Result {
    let steps = 5;
    for i in 0..=steps {
        let pct = i as f64 / steps as f64;
        let label = format_micros(total_micros * pct);
        let x = (LABEL_WIDTH + PADDING) as f64 + CHART_WIDTH as f64 * pct;

        write!(
            buf,
            r#"<line x1="{x:.1}" y1="{y1}" x2="{x:.1}" y2="100%" class="grid" /><text x="{x:.1}" y="{y2}" text-anchor="middle" class="axis">{label}</text>"#,
            y1 = HEADER_HEIGHT,
            y2 = HEADER_HEIGHT - 5,
        )?;
    }
    Ok(())
}

fn write_rows<G>(
    buf: &mut String,
    graph: &Graph<G>,
    ran: &[(TaskId, &TaskExecution)],
    global_start: Instant,
    total_micros: f64,
) -> std::fmt::Result
where
    G: Send + Sync,
{
    for (i, (id, exec)) in ran.iter().enumerate() {
        let name = graph.task(*id).map(|task| task.name()).unwrap_or("?");
        let name = XmlSafe(name);

        let y = HEADER_HEIGHT + i as u32 * ROW_HEIGHT;
        let y_center = y + ROW_HEIGHT / 2;

        write!(
            buf,
            r#"<rect x="0" y="{y}" width="100%" height="{ROW_HEIGHT}" class="row" />"#
        )?;
        write!(
            buf,
            r#"<text x="{PADDING}" y="{y_center}" class="label" dominant-baseline="middle">{name}</text>"#
        )?;

        let offset = exec.start.duration_since(global_start).as_micros() as f64;
        let micros = exec.duration.as_micros() as f64;

        let bar_x = (LABEL_WIDTH + PADDING) as f64 + offset / total_micros * CHART_WIDTH as f64;
        let bar_w = (micros / total_micros * CHART_WIDTH as f64).max(1.0);

        write!(
            buf,
            r#"<rect x="{bar_x:.1}" y="{}" width="{bar_w:.1}" height="{}" class="bar"><title>{name}: {:.2?}</title></rect>"#,
            y + 5,
            ROW_HEIGHT - 10,
            exec.duration,
        )?;
        write!(
            buf,
            r#"<text x="{:.1}" y="{y_center}" class="time" dominant-baseline="middle">{}</text>"#,
            bar_x + bar_w + 5.0,
            format_micros(micros),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{datasets, task};

    fn diagnostics(durations: &[(usize, u64, u64)]) -> Diagnostics {
        let base = Instant::now();
        Diagnostics {
            execution_times: durations
                .iter()
                .map(|&(id, start, ms)| {
                    (
                        TaskId(id),
                        TaskExecution {
                            start: base + Duration::from_millis(start),
                            duration: Duration::from_millis(ms),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_wall_time_and_slowest() {
        let diag = diagnostics(&[(0, 0, 10), (1, 10, 30), (2, 10, 5)]);

        assert_eq!(diag.wall_time(), Duration::from_millis(40));
        assert_eq!(
            diag.slowest(2),
            vec![
                (TaskId(1), Duration::from_millis(30)),
                (TaskId(0), Duration::from_millis(10))
            ]
        );
        assert_eq!(Diagnostics::default().wall_time(), Duration::ZERO);
    }

    #[test]
    fn test_mermaid_marks_tasks_not_run() {
        let [x] = datasets(["x"]);
        let graph = Graph::build([task("a", &[], &[&x]), task("b", &[&x], &[])]).unwrap();
        let diag = diagnostics(&[(0, 0, 10)]);

        let rendered = diag.render_mermaid(&graph);
        assert!(rendered.contains("style 1 fill:#ADD8E6"));
        assert!(rendered.contains("0 -- \"x\" --> 1"));
    }

    #[test]
    fn test_waterfall() {
        let graph = Graph::build([task("<a>", &[], &[])]).unwrap();

        let empty = Diagnostics::default().render_waterfall(&graph);
        assert!(empty.contains("No tasks ran"));

        let svg = diagnostics(&[(0, 0, 3)]).render_waterfall(&graph);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("&lt;a&gt;"));
    }

    #[test]
    fn test_heat_scale() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(1.0), "#FF0000");
    }
}

//! Per-run summary table and electronic logbook posting.
//!
//! [`RunTable`] collects one formatted row per event. [`ElogPoster`] wraps a
//! run table and posts it to an [`Elog`] when the run stops, along with a
//! short plan summary when the run starts.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::PlanResult;
use crate::experiment::{
    DataValue, DescriptorDoc, DocumentCallback, Dtype, EventDoc, StartDoc, StopDoc,
};

/// Placeholder for a cell whose value is missing or cannot be formatted.
pub const NOT_AVAILABLE: &str = "N/A";

const SEQ_NUM_COLUMN: &str = "seq_num";
const TIME_COLUMN: &str = "time";

const TABLE_HEAD: &str = concat!(
    "<html>\n<head>\n<style>\n",
    "table, th, td { border: 1px solid #777; border-collapse: collapse; padding: 4px; }\n",
    "</style>\n</head>\n<body>\n",
);
const TABLE_TAIL: &str = "</body>\n</html>\n";

/// Tabular summary of every event in a run.
///
/// Columns are `seq_num`, `time` and then every data key with a supported
/// dtype, in the order descriptors declare them (sorted within a descriptor).
#[derive(Debug, Default, Clone)]
pub struct RunTable {
    descriptors: HashSet<String>,
    formats: HashMap<String, Dtype>,
    columns: Vec<String>,
    rows: Vec<HashMap<String, String>>,
}

impl RunTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every descriptor and row.
    pub fn reset(&mut self) {
        self.descriptors.clear();
        self.formats.clear();
        self.columns.clear();
        self.rows.clear();
    }

    /// True when no event has been recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of recorded rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Column names in display order.
    pub fn columns(&self) -> Vec<&str> {
        [SEQ_NUM_COLUMN, TIME_COLUMN]
            .into_iter()
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    /// Formatted cell, if the row exists.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row).map(|r| {
            r.get(column)
                .map(String::as_str)
                .unwrap_or(NOT_AVAILABLE)
        })
    }

    /// Render the table as an HTML `<table>` element.
    pub fn render_html(&self) -> String {
        let columns = self.columns();
        let mut html = String::from("<table>\n  <thead>\n    <tr>\n");
        for column in &columns {
            html.push_str(&format!("      <th>{}</th>\n", escape_html(column)));
        }
        html.push_str("    </tr>\n  </thead>\n  <tbody>\n");
        for row in &self.rows {
            html.push_str("    <tr>\n");
            for column in &columns {
                let cell = row.get(*column).map(String::as_str).unwrap_or(NOT_AVAILABLE);
                html.push_str(&format!("      <td>{}</td>\n", escape_html(cell)));
            }
            html.push_str("    </tr>\n");
        }
        html.push_str("  </tbody>\n</table>\n");
        html
    }

    /// Full HTML page wrapping [`RunTable::render_html`].
    pub fn render_page(&self) -> String {
        format!("{}{}{}", TABLE_HEAD, self.render_html(), TABLE_TAIL)
    }
}

impl DocumentCallback for RunTable {
    fn start(&mut self, _doc: &StartDoc) -> PlanResult<()> {
        self.reset();
        Ok(())
    }

    fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.descriptors.insert(doc.uid.clone());

        let mut keys: Vec<_> = doc.data_keys.iter().collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        for (name, key) in keys {
            if !matches!(key.dtype, Dtype::String | Dtype::Number | Dtype::Integer) {
                warn!(field = %name, dtype = %key.dtype, "unsupported dtype skipped in run table");
                continue;
            }
            if self.formats.insert(name.clone(), key.dtype).is_none() {
                self.columns.push(name.clone());
            }
        }
        Ok(())
    }

    fn event(&mut self, doc: &EventDoc) -> PlanResult<()> {
        if !self.descriptors.contains(&doc.descriptor_uid) {
            debug!(descriptor = %doc.descriptor_uid, "event from unknown descriptor ignored");
            return Ok(());
        }

        let mut row = HashMap::new();
        row.insert(SEQ_NUM_COLUMN.to_string(), doc.seq_num.to_string());
        row.insert(TIME_COLUMN.to_string(), format_time(doc.time_ns));

        for (name, dtype) in &self.formats {
            let cell = match doc.data.get(name).and_then(|v| format_value(*dtype, v)) {
                Some(cell) => cell,
                None => {
                    warn!(field = %name, "unable to format value for run table");
                    NOT_AVAILABLE.to_string()
                }
            };
            row.insert(name.clone(), cell);
        }
        self.rows.push(row);
        Ok(())
    }
}

/// Electronic logbook seam.
pub trait Elog {
    /// Post a message body with tags and an optional title.
    fn post(&self, body: &str, tags: &[&str], title: Option<&str>) -> anyhow::Result<()>;

    /// Whether runs are posted when their start document carries no `post` flag.
    fn enable_run_posts(&self) -> bool {
        false
    }
}

/// Posts plan summaries and run tables to an electronic logbook.
pub struct ElogPoster<E> {
    elog: E,
    table: RunTable,
    send_post: bool,
}

impl<E: Elog> ElogPoster<E> {
    /// Poster writing to `elog`; a run is posted when its `post` flag or the
    /// elog default says so.
    pub fn new(elog: E) -> Self {
        Self {
            elog,
            table: RunTable::new(),
            send_post: false,
        }
    }

    /// The logbook posts go to.
    pub fn elog(&self) -> &E {
        &self.elog
    }

    /// Table collected for the current run.
    pub fn table(&self) -> &RunTable {
        &self.table
    }

    fn post(&self, body: &str, tags: &[&str], title: Option<&str>) {
        if let Err(err) = self.elog.post(body, tags, title) {
            warn!(error = %err, "failed to post to elog");
        }
    }
}

fn plan_summary(doc: &StartDoc) -> String {
    let mut args: Vec<_> = doc.plan_args.iter().collect();
    args.sort();
    let args = args
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", doc.plan_name, args)
}

impl<E: Elog> DocumentCallback for ElogPoster<E> {
    fn start(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.send_post = doc
            .post_flag()
            .unwrap_or_else(|| self.elog.enable_run_posts());
        self.table.start(doc)?;
        if self.send_post {
            self.post(&plan_summary(doc), &["plan_info", "RE"], None);
        }
        Ok(())
    }

    fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.table.descriptor(doc)
    }

    fn event(&mut self, doc: &EventDoc) -> PlanResult<()> {
        self.table.event(doc)
    }

    fn stop(&mut self, _doc: &StopDoc) -> PlanResult<()> {
        if self.send_post && !self.table.is_empty() {
            self.post(&self.table.render_page(), &["run_table", "RE"], Some("run_table"));
        }
        Ok(())
    }
}

/// Format one value according to its declared dtype.
///
/// Strings keep their first five characters, numbers use three significant
/// digits and integers print in decimal. Mismatched values yield `None`.
pub fn format_value(dtype: Dtype, value: &DataValue) -> Option<String> {
    match (dtype, value) {
        (Dtype::String, DataValue::Text(s)) => Some(s.chars().take(5).collect()),
        (Dtype::Number, v) => v.as_f64().map(format_sig3),
        (Dtype::Integer, DataValue::Integer(i)) => Some(i.to_string()),
        _ => None,
    }
}

/// Format with three significant digits, switching to exponent notation
/// outside `1e-4 <= |v| < 1e3`.
fn format_sig3(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return v.to_string();
    }

    let sci = format!("{:.2e}", v);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if !(-4..3).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (2 - exp) as usize;
        trim_zeros(&format!("{:.*}", decimals, v)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Time of day as `HH:MM:SS.ff` in UTC.
fn format_time(time_ns: u64) -> String {
    let secs = (time_ns / 1_000_000_000) as i64;
    let nanos = (time_ns % 1_000_000_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(t) => {
            let full = t.format("%H:%M:%S%.6f").to_string();
            full[..full.len() - 4].to_string()
        }
        None => NOT_AVAILABLE.to_string(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

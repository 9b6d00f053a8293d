use std::io::{self, IsTerminal, Write};
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_local, time_ago};
use crate::filter::{ViewQuery, visible_tasks};
use crate::task::{Priority, Task};
use crate::theme::Theme;

/// One display record of the visible list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskRow {
    pub id: u64,
    pub text: String,
    pub category: String,
    pub priority: Priority,
    pub age: String,
    pub completed: bool,
}

impl TaskRow {
    pub fn from_task(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            id: task.id,
            text: task.text.clone(),
            category: task.category.clone(),
            priority: task.priority,
            age: time_ago(task.created_at, now),
            completed: task.completed,
        }
    }
}

/// Recomputes the whole view model from the store's list.
pub fn build_rows(tasks: &[Task], query: &ViewQuery, now: DateTime<Utc>) -> Vec<TaskRow> {
    visible_tasks(tasks, query)
        .into_iter()
        .map(|task| TaskRow::from_task(task, now))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Html,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            other => Err(anyhow!("invalid output format: {other} (expected table, json or html)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    theme: Theme,
}

impl Renderer {
    pub fn new(cfg: &Config, theme: Theme) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, theme })
    }

    pub fn plain(theme: Theme) -> Self {
        Self {
            color: false,
            theme,
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    #[tracing::instrument(skip(self, out, rows))]
    pub fn write_rows<W: Write>(
        &self,
        mut out: W,
        rows: &[TaskRow],
        format: OutputFormat,
    ) -> anyhow::Result<()> {
        match format {
            OutputFormat::Table => self.write_table(out, rows),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut out, rows)?;
                writeln!(out)?;
                Ok(())
            }
            OutputFormat::Html => {
                write!(out, "{}", render_html(rows, self.theme))?;
                Ok(())
            }
        }
    }

    fn write_table<W: Write>(&self, mut out: W, rows: &[TaskRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            writeln!(out, "No matching tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Pri".to_string(),
            "Category".to_string(),
            "Age".to_string(),
            "Text".to_string(),
        ];

        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let done = if row.completed { "x" } else { "" };
            let priority = self.paint(
                &row.priority.as_str().to_ascii_uppercase(),
                self.priority_code(row.priority),
            );
            let text = if row.completed {
                self.paint(&row.text, "2")
            } else {
                row.text.clone()
            };

            cells.push(vec![
                self.paint(&row.id.to_string(), self.id_code()),
                done.to_string(),
                priority,
                row.category.clone(),
                row.age.clone(),
                text,
            ]);
        }

        write_table(&mut out, headers, cells)?;
        writeln!(out)?;
        writeln!(out, "{} task(s)", rows.len())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, task, now))]
    pub fn write_task_info<W: Write>(
        &self,
        mut out: W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "text      {}", task.text)?;
        writeln!(out, "category  {}", task.category)?;
        writeln!(out, "priority  {}", task.priority)?;
        writeln!(
            out,
            "status    {}",
            if task.completed { "completed" } else { "pending" }
        )?;
        writeln!(
            out,
            "created   {} ({})",
            format_local(task.created_at),
            time_ago(task.created_at, now)
        )?;

        Ok(())
    }

    // Dark terminals get the bright variants.
    fn priority_code(&self, priority: Priority) -> &'static str {
        match (priority, self.theme) {
            (Priority::High, Theme::Light) => "31",
            (Priority::High, Theme::Dark) => "91",
            (Priority::Medium, Theme::Light) => "33",
            (Priority::Medium, Theme::Dark) => "93",
            (Priority::Low, Theme::Light) => "32",
            (Priority::Low, Theme::Dark) => "92",
        }
    }

    fn id_code(&self) -> &'static str {
        match self.theme {
            Theme::Light => "34",
            Theme::Dark => "96",
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Escapes text for insertion into HTML element content or attribute values.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// HTML fragment for the visible list, themed by a class on the body.
pub fn render_html(rows: &[TaskRow], theme: Theme) -> String {
    let mut html = format!("<body class=\"{}\">\n", theme.as_str());
    html.push_str("<ul class=\"task-list\">\n");

    for row in rows {
        let class = if row.completed {
            "task-item completed"
        } else {
            "task-item"
        };
        html.push_str(&format!(
            "  <li class=\"{class}\" data-id=\"{}\">\n",
            row.id
        ));
        html.push_str(&format!(
            "    <div class=\"task-title\">{}</div>\n",
            escape_html(&row.text)
        ));
        html.push_str(&format!(
            r#"    <div class="task-meta"><span class="chip">{}</span> &bull; {} &bull; {}</div>"#,
            escape_html(&row.category),
            row.priority.as_str().to_ascii_uppercase(),
            escape_html(&row.age)
        ));
        html.push_str("\n  </li>\n");
    }

    html.push_str("</ul>\n</body>\n");
    html
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::confirm::Confirm;
use crate::filter::ViewQuery;
use crate::render::{OutputFormat, Renderer, build_rows};
use crate::storage::KvStore;
use crate::store::TaskStore;
use crate::task::Priority;
use crate::theme::{Theme, load_theme, save_theme, toggle_theme};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "info",
        "toggle",
        "done",
        "edit",
        "delete",
        "clear",
        "categories",
        "export",
        "theme",
        "show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Everything a command needs besides the store.
pub struct CommandEnv<'a, W: Write> {
    pub cfg: &'a Config,
    pub renderer: &'a mut Renderer,
    pub confirm: &'a mut dyn Confirm,
    pub out: W,
    pub now: DateTime<Utc>,
}

#[instrument(skip(store, ctx, inv))]
pub fn dispatch<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    inv: Invocation,
) -> anyhow::Result<()> {
    report_storage_warning(store);

    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();
    debug!(command, ?args, "dispatching command");

    let result = match command {
        "add" => cmd_add(store, ctx, args),
        "list" => cmd_list(store, ctx, args),
        "info" => cmd_info(store, ctx, args),
        "toggle" | "done" => cmd_toggle(store, ctx, args),
        "edit" => cmd_edit(store, ctx, args),
        "delete" => cmd_delete(store, ctx, args),
        "clear" => cmd_clear(store, ctx, args),
        "categories" => cmd_categories(store, ctx),
        "export" => cmd_export(store, ctx),
        "theme" => cmd_theme(store, ctx, args),
        "show" => cmd_show(ctx),
        "help" => cmd_help(ctx),
        "version" => {
            writeln!(ctx.out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    };

    report_storage_warning(store);
    result
}

fn report_storage_warning<S: KvStore>(store: &mut TaskStore<S>) {
    if let Some(warning) = store.take_warning() {
        eprintln!("Warning: {warning}. Changes are kept for this session only.");
    }
}

#[instrument(skip(store, ctx, args))]
fn cmd_add<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command add");

    let parsed = parse_add_args(ctx.cfg, args)?;
    let category = resolve_category(ctx.cfg, &parsed.category)?;

    match store.add(&parsed.text, &category, parsed.priority, ctx.now) {
        Some(task) => {
            debug!(count = store.len(), "task added");
            writeln!(ctx.out, "Created task {}.", task.id)?;
        }
        None => writeln!(ctx.out, "Nothing added: task text is empty.")?,
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct AddArgs {
    text: String,
    category: String,
    priority: Priority,
}

fn parse_add_args(cfg: &Config, args: &[String]) -> anyhow::Result<AddArgs> {
    let mut words = Vec::new();
    let mut category = cfg
        .get("default.category")
        .unwrap_or_else(|| "General".to_string());
    let mut priority = match cfg.get("default.priority") {
        Some(raw) => raw
            .parse::<Priority>()
            .context("invalid default.priority setting")?,
        None => Priority::Medium,
    };

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal {
            if let Some(value) = arg
                .strip_prefix("category:")
                .or_else(|| arg.strip_prefix("cat:"))
            {
                category = value.to_string();
                continue;
            }
            if let Some(value) = arg
                .strip_prefix("priority:")
                .or_else(|| arg.strip_prefix("pri:"))
            {
                priority = value.parse()?;
                continue;
            }
        }

        words.push(arg.as_str());
    }

    Ok(AddArgs {
        text: words.join(" "),
        category,
        priority,
    })
}

/// Maps `category` onto the configured set when it matches case-insensitively.
/// With `category.strict` on, anything outside the set is rejected.
fn resolve_category(cfg: &Config, category: &str) -> anyhow::Result<String> {
    let category = category.trim();
    let known = cfg.get_list("categories");
    if let Some(canonical) = known.iter().find(|k| k.eq_ignore_ascii_case(category)) {
        return Ok(canonical.clone());
    }

    if cfg.get_bool("category.strict").unwrap_or(false) {
        return Err(anyhow!(
            "unknown category: {category} (known: {})",
            known.join(", ")
        ));
    }

    if category.is_empty() {
        return Ok(cfg
            .get("default.category")
            .unwrap_or_else(|| "General".to_string()));
    }
    Ok(category.to_string())
}

#[instrument(skip(store, ctx, args))]
fn cmd_list<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command list");

    let mut format = ctx
        .cfg
        .get("list.format")
        .unwrap_or_else(|| "table".to_string())
        .parse::<OutputFormat>()
        .context("invalid list.format setting")?;

    let mut terms = Vec::with_capacity(args.len());
    for arg in args {
        if let Some(value) = arg.strip_prefix("format:") {
            format = value.parse()?;
        } else {
            terms.push(arg.clone());
        }
    }

    let search_category = ctx.cfg.get_bool("search.category").unwrap_or(false);
    let query = ViewQuery::parse(&terms, search_category)?;
    let rows = build_rows(store.tasks(), &query, ctx.now);

    debug!(total = store.len(), visible = rows.len(), ?format, "rendering list");
    ctx.renderer.write_rows(&mut ctx.out, &rows, format)
}

#[instrument(skip(store, ctx, args))]
fn cmd_info<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    let id = parse_id("info", args)?;
    match store.get(id) {
        Some(task) => ctx.renderer.write_task_info(&mut ctx.out, task, ctx.now),
        None => not_found(ctx, id),
    }
}

#[instrument(skip(store, ctx, args))]
fn cmd_toggle<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command toggle");

    let id = parse_id("toggle", args)?;
    if !store.toggle_complete(id) {
        return not_found(ctx, id);
    }

    let state = match store.get(id) {
        Some(task) if task.completed => "completed",
        _ => "pending",
    };
    writeln!(ctx.out, "Task {id} marked {state}.")?;
    Ok(())
}

#[instrument(skip(store, ctx, args))]
fn cmd_edit<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command edit");

    let id = parse_id("edit", args)?;
    let text = args[1..].join(" ");
    if !store.update_text(id, &text) {
        return not_found(ctx, id);
    }

    if text.trim().is_empty() {
        writeln!(ctx.out, "Task {id} unchanged: new text is empty.")?;
    } else {
        writeln!(ctx.out, "Modified task {id}.")?;
    }
    Ok(())
}

#[instrument(skip(store, ctx, args))]
fn cmd_delete<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete");

    let id = parse_id("delete", args)?;
    let Some(task) = store.get(id) else {
        return not_found(ctx, id);
    };

    let prompt = format!("Delete task {id} '{}'?", task.text);
    if !ctx.confirm.confirm(&prompt)? {
        writeln!(ctx.out, "Cancelled.")?;
        return Ok(());
    }

    if store.delete(id) {
        writeln!(ctx.out, "Deleted task {id}.")?;
        Ok(())
    } else {
        not_found(ctx, id)
    }
}

#[instrument(skip(store, ctx, args))]
fn cmd_clear<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command clear");

    let scope = args.first().map(String::as_str).unwrap_or("completed");
    match scope {
        "completed" | "done" => {
            let pending_removal = store.tasks().iter().filter(|t| t.completed).count();
            if pending_removal == 0 {
                writeln!(ctx.out, "Nothing to clear.")?;
                return Ok(());
            }
            let prompt = format!("Delete {pending_removal} completed task(s)?");
            if !ctx.confirm.confirm(&prompt)? {
                writeln!(ctx.out, "Cancelled.")?;
                return Ok(());
            }
            let removed = store.clear_completed();
            writeln!(ctx.out, "Removed {removed} completed task(s).")?;
        }
        "all" => {
            if store.is_empty() {
                writeln!(ctx.out, "Nothing to clear.")?;
                return Ok(());
            }
            if !ctx.confirm.confirm("Delete ALL tasks?")? {
                writeln!(ctx.out, "Cancelled.")?;
                return Ok(());
            }
            let removed = store.clear_all();
            writeln!(ctx.out, "Removed {removed} task(s).")?;
        }
        other => {
            return Err(anyhow!(
                "clear expects 'completed' or 'all', got: {other}"
            ));
        }
    }
    Ok(())
}

#[instrument(skip(store, ctx))]
fn cmd_categories<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
) -> anyhow::Result<()> {
    let mut names = ctx.cfg.get_list("categories");
    for used in store.categories() {
        if !names.iter().any(|n| n == used) {
            names.push(used.to_string());
        }
    }

    for name in names {
        let count = store.tasks().iter().filter(|t| t.category == name).count();
        writeln!(ctx.out, "{name} {count}")?;
    }
    Ok(())
}

#[instrument(skip(store, ctx))]
fn cmd_export<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut ctx.out, store.tasks())
        .context("failed to encode tasks for export")?;
    writeln!(ctx.out)?;
    Ok(())
}

#[instrument(skip(store, ctx, args))]
fn cmd_theme<S: KvStore, W: Write>(
    store: &mut TaskStore<S>,
    ctx: &mut CommandEnv<'_, W>,
    args: &[String],
) -> anyhow::Result<()> {
    let (next, warning) = match args.first().map(String::as_str) {
        None | Some("show") => {
            writeln!(ctx.out, "Theme: {}", load_theme(store.storage()))?;
            return Ok(());
        }
        Some("toggle") => toggle_theme(store.storage_mut()),
        Some(other) => {
            let theme = other.parse::<Theme>()?;
            (theme, save_theme(store.storage_mut(), theme))
        }
    };

    if let Some(warning) = warning {
        eprintln!("Warning: {warning}. Using {next} for this session only.");
    }
    ctx.renderer.set_theme(next);
    writeln!(ctx.out, "Theme set to {next}.")?;
    Ok(())
}

fn cmd_show<W: Write>(ctx: &mut CommandEnv<'_, W>) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = ctx.cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        writeln!(ctx.out, "{key} = {value}")?;
    }
    for file in &ctx.cfg.loaded_files {
        writeln!(ctx.out, "# loaded {}", file.display())?;
    }
    Ok(())
}

fn cmd_help<W: Write>(ctx: &mut CommandEnv<'_, W>) -> anyhow::Result<()> {
    writeln!(
        ctx.out,
        "smarttask {}

Usage: smarttask [options] <command> [args]

Commands:
  add <text...> [category:C] [priority:P]    add a task
  list [status:S] [category:C] [format:F] [search...]
                                             show tasks (status: all, pending, completed)
  info <id>                                  show one task
  toggle <id>                                flip completion (alias: done)
  edit <id> <text...>                        replace the text of a task
  delete <id>                                delete a task
  clear [completed|all]                      remove completed (default) or all tasks
  categories                                 list categories with task counts
  export                                     print stored tasks as JSON
  theme [show|toggle|light|dark]             show or change the theme
  show                                       print effective settings
  help, version

Options:
  -v, -q          more or less logging (RUST_LOG also honoured)
  -y, --yes       do not ask before deleting
  --rc KEY=VALUE  override a setting (also rc.KEY=VALUE)
  --smarttaskrc   settings file (default ~/.smarttaskrc)
  --data DIR      storage directory (default ~/.smarttask)",
        env!("CARGO_PKG_VERSION")
    )?;
    Ok(())
}

fn parse_id(command: &str, args: &[String]) -> anyhow::Result<u64> {
    let raw = args
        .first()
        .ok_or_else(|| anyhow!("{command} requires a task id"))?;
    raw.parse::<u64>()
        .with_context(|| format!("invalid task id: {raw}"))
}

fn not_found<W: Write>(ctx: &mut CommandEnv<'_, W>, id: u64) -> anyhow::Result<()> {
    warn!(id, "task not found");
    writeln!(ctx.out, "No task with id {id}.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_args_pick_out_modifiers() {
        let cfg = Config::default();
        let parsed = parse_add_args(
            &cfg,
            &strings(&["Call", "cat:Work", "Bob", "priority:high"]),
        )
        .unwrap();
        assert_eq!(
            parsed,
            AddArgs {
                text: "Call Bob".to_string(),
                category: "Work".to_string(),
                priority: Priority::High,
            }
        );

        let literal = parse_add_args(&cfg, &strings(&["--", "pri:low", "is", "text"])).unwrap();
        assert_eq!(literal.text, "pri:low is text");
        assert_eq!(literal.priority, Priority::Medium);
        assert_eq!(literal.category, "General");
    }

    #[test]
    fn invalid_priority_is_rejected() {
        let cfg = Config::default();
        assert!(parse_add_args(&cfg, &strings(&["x", "pri:urgent"])).is_err());
    }

    #[test]
    fn categories_canonicalize_and_strict_mode_rejects() {
        let mut cfg = Config::default();
        assert_eq!(resolve_category(&cfg, "work").unwrap(), "Work");
        assert_eq!(resolve_category(&cfg, "Garden").unwrap(), "Garden");

        cfg.apply_overrides(vec![("category.strict".to_string(), "on".to_string())]);
        assert!(resolve_category(&cfg, "Garden").is_err());
        assert_eq!(resolve_category(&cfg, "PERSONAL").unwrap(), "Personal");
    }

    #[test]
    fn abbreviation_requires_unique_prefix() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("ed", &known), Some("edit"));
        assert_eq!(expand_command_abbrev("ex", &known), Some("export"));
        assert_eq!(expand_command_abbrev("e", &known), None);
        assert_eq!(expand_command_abbrev("list", &known), Some("list"));
    }

    #[test]
    fn id_parsing_errors_are_descriptive() {
        assert_eq!(parse_id("toggle", &strings(&["12"])).unwrap(), 12);
        assert!(
            parse_id("toggle", &[])
                .unwrap_err()
                .to_string()
                .contains("requires a task id")
        );
        assert!(
            parse_id("edit", &strings(&["abc"]))
                .unwrap_err()
                .to_string()
                .contains("invalid task id")
        );
    }
}

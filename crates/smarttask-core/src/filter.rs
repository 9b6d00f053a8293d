use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum StatusFilter {
  #[default]
  All,
  Pending,
  Completed
}

impl StatusFilter {
  fn keeps(
    self,
    task: &Task
  ) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Pending => {
        !task.completed
      }
      | StatusFilter::Completed => {
        task.completed
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" | "" => {
        Ok(StatusFilter::All)
      }
      | "pending" => {
        Ok(StatusFilter::Pending)
      }
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | other => Err(anyhow!(
        "invalid status filter: \
         {other} (expected all, \
         pending or completed)"
      ))
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | StatusFilter::All => "all",
      | StatusFilter::Pending => {
        "pending"
      }
      | StatusFilter::Completed => {
        "completed"
      }
    })
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Default,
)]
pub enum CategoryFilter {
  #[default]
  All,
  Named(String)
}

impl CategoryFilter {
  pub fn parse(value: &str) -> Self {
    let value = value.trim();
    if value.is_empty()
      || value == "all"
    {
      CategoryFilter::All
    } else {
      CategoryFilter::Named(
        value.to_string()
      )
    }
  }

  fn keeps(
    &self,
    task: &Task
  ) -> bool {
    match self {
      | CategoryFilter::All => true,
      | CategoryFilter::Named(name) => {
        task.category == *name
      }
    }
  }
}

/// Criteria for the visible subset of the store. All three predicates are
/// ANDed.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct ViewQuery {
  pub search:          String,
  pub status:          StatusFilter,
  pub category:        CategoryFilter,
  /// Whether `search` also matches
  /// the category.
  pub search_category: bool
}

impl ViewQuery {
  /// Builds a query from command-line
  /// terms: `status:S`, `category:C`
  /// (or `cat:C`); every other term is
  /// part of the free-text search.
  #[tracing::instrument(skip(terms))]
  pub fn parse(
    terms: &[String],
    search_category: bool
  ) -> anyhow::Result<Self> {
    let mut query = ViewQuery {
      search_category,
      ..ViewQuery::default()
    };
    let mut words = Vec::new();

    for term in terms {
      if let Some(status) =
        term.strip_prefix("status:")
      {
        query.status = status.parse()?;
      } else if let Some(cat) = term
        .strip_prefix("category:")
        .or_else(|| {
          term.strip_prefix("cat:")
        })
      {
        query.category =
          CategoryFilter::parse(cat);
      } else {
        words.push(term.as_str());
      }
    }

    query.search = words.join(" ");
    trace!(?query, "parsed view query");
    Ok(query)
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    self.status.keeps(task)
      && self.category.keeps(task)
      && self.search_keeps(task)
  }

  fn search_keeps(
    &self,
    task: &Task
  ) -> bool {
    let needle =
      self.search.trim().to_lowercase();
    if needle.is_empty() {
      return true;
    }

    task
      .text
      .to_lowercase()
      .contains(&needle)
      || (self.search_category
        && task
          .category
          .to_lowercase()
          .contains(&needle))
  }
}

/// The subset of `tasks` matching
/// `query`, in input order.
pub fn visible_tasks<'a>(
  tasks: &'a [Task],
  query: &ViewQuery
) -> Vec<&'a Task> {
  tasks
    .iter()
    .filter(|task| query.matches(task))
    .collect()
}

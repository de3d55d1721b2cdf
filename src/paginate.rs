//! Paging through a long list of lines inside a dedicated level.

use crate::command::{Command, Invocation};
use crate::error::ReplError;
use crate::queue::OutputHandle;
use crate::session::{LevelHandle, Session};
use argh::FromArgs;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct Pager {
    items: Vec<String>,
    cursor: usize,
    page_size: usize,
}

impl Pager {
    fn new(items: Vec<String>, page_size: usize) -> Result<Self, ReplError> {
        if page_size == 0 {
            return Err(ReplError::invalid_input("invalid page size"));
        }
        Ok(Self {
            items,
            cursor: 0,
            page_size,
        })
    }

    /// The page starting at the cursor; moves the cursor past it.
    fn next_page(&mut self) -> Vec<String> {
        let start = self.cursor;
        let end = start.saturating_add(self.page_size).min(self.items.len());
        self.cursor = end;
        self.items[start..end].to_vec()
    }

    /// The page ending at the cursor. The cursor does not move.
    fn previous_page(&self) -> Vec<String> {
        let start = self.cursor.saturating_sub(self.page_size);
        self.items[start..self.cursor].to_vec()
    }

    fn title(&self) -> String {
        let position = if self.cursor >= self.items.len() {
            "<END>".to_string()
        } else {
            self.cursor.to_string()
        };
        format!("paginate {position}/{}@{}", self.items.len(), self.page_size)
    }
}

#[derive(FromArgs)]
/// Change the number of lines per page.
struct CountArgs {
    #[argh(positional)]
    /// lines per page, at least one
    size: usize,
}

type SharedPager = Arc<Mutex<Pager>>;

impl Session {
    /// Shows `items` a page at a time.
    ///
    /// Pushes a `paginate` level, prints the first page and names the level after
    /// the pager position. Inside the level, `n`/`next` shows the next page,
    /// `p`/`prev` shows the page before the cursor again, `c`/`count <size>`
    /// changes the page size and `q` leaves the level.
    pub async fn paginate(
        &self,
        items: Vec<String>,
        output: &OutputHandle,
        page_size: usize,
    ) -> anyhow::Result<()> {
        let pager: SharedPager = Arc::new(Mutex::new(Pager::new(items, page_size)?));
        let level = self.push("paginate");

        let commands = [
            pager_command("n", "next", "Show the next page", &pager, &level, |pager, _| {
                Ok(pager.next_page())
            }),
            pager_command("p", "prev", "Show the previous page again", &pager, &level, |pager, _| {
                Ok(pager.previous_page())
            }),
            pager_command("c", "count", "Change the page size", &pager, &level, |pager, args| {
                let parsed: CountArgs = crate::builtin::parse_args("count", args, "invalid page size")?;
                if parsed.size == 0 {
                    return Err(ReplError::invalid_input("invalid page size"));
                }
                pager.page_size = parsed.size;
                Ok(Vec::new())
            }),
            leave_command(&level),
        ];
        for command in commands {
            level.register(command)?;
        }

        let (page, title) = {
            let mut pager = pager.lock();
            (pager.next_page(), pager.title())
        };
        for line in page {
            output.line(line).await?;
        }
        level.rename(title);
        Ok(())
    }
}

fn pager_command<F>(
    name: &str,
    alias: &str,
    help: &str,
    pager: &SharedPager,
    level: &LevelHandle,
    step: F,
) -> Command
where
    F: Fn(&mut Pager, &[String]) -> Result<Vec<String>, ReplError> + Send + Sync + Clone + 'static,
{
    let pager = pager.clone();
    let level = level.clone();
    Command::new(name, move |inv: Invocation| {
        let pager = pager.clone();
        let level = level.clone();
        let step = step.clone();
        async move {
            let (page, title) = {
                let mut pager = pager.lock();
                let page = step(&mut *pager, &inv.args)?;
                (page, pager.title())
            };
            for line in page {
                inv.output.line(line).await?;
            }
            level.rename(title);
            Ok(())
        }
    })
    .with_alias(alias)
    .with_help(help)
}

fn leave_command(level: &LevelHandle) -> Command {
    let level = level.clone();
    Command::new("q", move |inv: Invocation| {
        let level = level.clone();
        async move { level.leave(&inv.output).await }
    })
    .with_help("Leave the pager")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pager(size: usize) -> Pager {
        let items = ["a", "b", "c", "d"].map(String::from).to_vec();
        Pager::new(items, size).unwrap()
    }

    #[test]
    fn test_paging_forward_and_back() {
        let mut pager = pager(2);
        assert_eq!(pager.next_page(), ["a", "b"]);
        assert_eq!(pager.title(), "paginate 2/4@2");

        pager.page_size = 1;
        assert_eq!(pager.previous_page(), ["b"]);
        assert_eq!(pager.title(), "paginate 2/4@1");

        pager.page_size = 4;
        assert_eq!(pager.next_page(), ["c", "d"]);
        assert_eq!(pager.title(), "paginate <END>/4@4");
        assert!(pager.next_page().is_empty());
    }

    #[test]
    fn test_previous_page_at_start_is_empty() {
        let pager = pager(3);
        assert!(pager.previous_page().is_empty());
        assert_eq!(pager.title(), "paginate 0/4@3");
    }

    #[test]
    fn test_huge_page_size_shows_the_rest() {
        let mut pager = pager(1);
        assert_eq!(pager.next_page(), ["a"]);
        pager.page_size = usize::MAX;
        assert_eq!(pager.previous_page(), ["a"]);
        assert_eq!(pager.next_page(), ["b", "c", "d"]);
        assert_eq!(pager.title(), format!("paginate <END>/4@{}", usize::MAX));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = Pager::new(Vec::new(), 0).unwrap_err();
        assert_eq!(err.to_string(), "invalid page size");
    }

    #[test]
    fn test_empty_list_is_exhausted() {
        let mut pager = Pager::new(Vec::new(), 2).unwrap();
        assert!(pager.next_page().is_empty());
        assert_eq!(pager.title(), "paginate <END>/0@2");
    }
}

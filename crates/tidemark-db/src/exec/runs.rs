//! Splitting a command list into schema-homogeneous runs.

use tidemark_core::{Command, DataType, Op, TableId};

/// A maximal contiguous slice of commands written in one transaction.
#[derive(Debug, Clone, Copy)]
pub struct Run<'a> {
    /// Commands in source order.
    pub commands: &'a [Command],
    /// Table every merge of the run targets; `None` for runs without merges.
    pub merge_table: Option<&'a TableId>,
}

impl Run<'_> {
    /// Merges of the run.
    pub fn merges(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|c| c.op == Op::Merge)
    }
}

/// Column signature of a merge: target table and `(name, type kind)` pairs.
///
/// Sizes are left out so that differing string lengths do not split a run.
type Signature<'a> = (&'a TableId, Vec<(&'a str, DataType)>);

fn signature(cmd: &Command) -> Signature<'_> {
    (
        &cmd.table,
        cmd.columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type))
            .collect(),
    )
}

/// Partitions `commands` into runs.
///
/// A merge whose signature differs from the run's first merge starts a new
/// run. Deletes and truncates carry no schema and always join the current
/// run.
#[must_use]
pub fn partition_runs(commands: &[Command]) -> Vec<Run<'_>> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut current: Option<Signature<'_>> = None;

    for (i, cmd) in commands.iter().enumerate() {
        if cmd.op != Op::Merge {
            continue;
        }
        let sig = signature(cmd);
        match &current {
            Some(existing) if *existing != sig => {
                runs.push(Run {
                    commands: &commands[start..i],
                    merge_table: current.as_ref().map(|s| s.0),
                });
                start = i;
                current = Some(sig);
            }
            Some(_) => {}
            None => current = Some(sig),
        }
    }
    if start < commands.len() {
        runs.push(Run {
            commands: &commands[start..],
            merge_table: current.as_ref().map(|s| s.0),
        });
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tidemark_core::{ColumnType, CommandColumn};

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn merge(table: &str, cols: &[(&str, ColumnType, &str)]) -> Command {
        let mut cmd = Command::new(Op::Merge, TableId::new("s", table), ts());
        cmd.columns = cols
            .iter()
            .map(|(n, t, v)| CommandColumn::new(*n, *t, Some((*v).to_string())))
            .collect();
        cmd
    }

    fn delete(table: &str) -> Command {
        Command::new(Op::Delete, TableId::new("s", table), ts())
    }

    fn lens(runs: &[Run<'_>]) -> Vec<usize> {
        runs.iter().map(|r| r.commands.len()).collect()
    }

    #[test]
    fn test_identical_signatures_share_a_run() {
        let cmds = vec![
            merge("a", &[("id", ColumnType::varchar(1), "1")]),
            merge("a", &[("id", ColumnType::varchar(3), "123")]),
        ];
        let runs = partition_runs(&cmds);
        assert_eq!(lens(&runs), vec![2]);
        assert_eq!(runs[0].merge_table, Some(&TableId::new("s", "a")));
    }

    #[test]
    fn test_signature_change_splits() {
        let int = ColumnType::new(DataType::Integer, 8);
        let cmds = vec![
            merge("a", &[("id", int, "1")]),
            merge("a", &[("id", int, "2"), ("x", int, "3")]),
            merge("b", &[("id", int, "1")]),
            merge("b", &[("id", ColumnType::varchar(1), "z")]),
        ];
        assert_eq!(lens(&partition_runs(&cmds)), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_deletes_join_current_run() {
        let int = ColumnType::new(DataType::Integer, 8);
        let cmds = vec![
            delete("z"),
            merge("a", &[("id", int, "1")]),
            delete("a"),
            merge("a", &[("id", int, "2")]),
            delete("b"),
        ];
        let runs = partition_runs(&cmds);
        assert_eq!(lens(&runs), vec![5]);
        assert_eq!(runs[0].merges().count(), 2);
    }

    #[test]
    fn test_only_deletes() {
        let cmds = vec![delete("a"), delete("b")];
        let runs = partition_runs(&cmds);
        assert_eq!(lens(&runs), vec![2]);
        assert_eq!(runs[0].merge_table, None);
        assert!(partition_runs(&[]).is_empty());
    }
}

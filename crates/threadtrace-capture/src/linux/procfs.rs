use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use threadtrace_types::{RunState, ThreadName, Tid};

use crate::Blacklist;

/// Thread listing and metadata from `/proc/self/task`.
pub(crate) struct ProcTasks {
    root: PathBuf,
}

impl ProcTasks {
    pub(crate) fn current_process() -> Self {
        Self::at("/proc/self/task")
    }

    pub(crate) fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn enumerate(
        &self,
        exclude: Option<Tid>,
        blacklist: &Blacklist,
        out: &mut [Tid],
    ) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };

        let mut count = 0;
        for entry in entries.flatten() {
            if count == out.len() {
                break;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
                .map(Tid::new)
            else {
                continue;
            };
            if Some(id) == exclude || blacklist.contains(id) {
                continue;
            }
            out[count] = id;
            count += 1;
        }
        count
    }

    pub(crate) fn read_name(&self, id: Tid) -> Option<ThreadName> {
        let mut file = File::open(self.root.join(id.to_string()).join("comm")).ok()?;
        // comm is at most 16 bytes including the newline.
        let mut buf = [0u8; 64];
        let len = file.read(&mut buf).ok()?;
        let mut bytes = &buf[..len];
        if let Some(stripped) = bytes.strip_suffix(b"\n") {
            bytes = stripped;
        }
        let name = ThreadName::from_bytes_truncated(bytes);
        (!name.is_empty()).then_some(name)
    }

    pub(crate) fn read_state(&self, id: Tid) -> RunState {
        fs::read_to_string(self.root.join(id.to_string()).join("stat"))
            .ok()
            .and_then(|stat| parse_stat_state(&stat))
            .map(RunState::from_proc_state)
            .unwrap_or(RunState::Unknown)
    }
}

/// Extracts the state character from a `stat` line: `pid (comm) S ...`.
///
/// `comm` may itself contain spaces and parentheses, so the command field
/// ends at the last `)` on the line.
pub(crate) fn parse_stat_state(stat: &str) -> Option<u8> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    if close < open {
        return None;
    }
    let field = stat[close + 1..].split_ascii_whitespace().next()?;
    match field.as_bytes() {
        [state] => Some(*state),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fake_task(root: &Path, id: u64, comm: Option<&str>, stat: Option<&str>) {
        let dir = root.join(id.to_string());
        fs::create_dir_all(&dir).unwrap();
        if let Some(comm) = comm {
            fs::write(dir.join("comm"), comm).unwrap();
        }
        if let Some(stat) = stat {
            fs::write(dir.join("stat"), stat).unwrap();
        }
    }

    #[test]
    fn stat_state_after_last_paren() {
        assert_eq!(parse_stat_state("42 (worker) S 1 2 3"), Some(b'S'));
        assert_eq!(parse_stat_state("42 (we ird) (name)) R 1 2"), Some(b'R'));
        assert_eq!(parse_stat_state("42 (a b c) D"), Some(b'D'));
    }

    #[test]
    fn malformed_stat_is_rejected() {
        assert_eq!(parse_stat_state(""), None);
        assert_eq!(parse_stat_state("42 worker S"), None);
        assert_eq!(parse_stat_state("42 (worker)"), None);
        assert_eq!(parse_stat_state("42 (worker) SS 1"), None);
        assert_eq!(parse_stat_state("42 )worker( S"), None);
    }

    #[test]
    fn enumerates_numeric_entries_with_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        for id in [100, 101, 102, 103] {
            fake_task(dir.path(), id, None, None);
        }
        fs::create_dir(dir.path().join("not-a-thread")).unwrap();

        let tasks = ProcTasks::at(dir.path());
        let mut blacklist = Blacklist::with_capacity(4);
        blacklist.insert(Tid::new(102));
        let mut out = [Tid::default(); 8];
        let count = tasks.enumerate(Some(Tid::new(100)), &blacklist, &mut out);
        let mut found: Vec<u64> = out[..count].iter().map(|id| id.get()).collect();
        found.sort_unstable();
        assert_eq!(found, vec![101, 103]);
    }

    #[test]
    fn enumeration_stops_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        for id in 1..=5 {
            fake_task(dir.path(), id, None, None);
        }
        let mut out = [Tid::default(); 3];
        let count = ProcTasks::at(dir.path()).enumerate(None, &Blacklist::default(), &mut out);
        assert_eq!(count, 3);
    }

    #[test]
    fn missing_directory_enumerates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = ProcTasks::at(dir.path().join("gone"));
        let mut out = [Tid::default(); 4];
        assert_eq!(tasks.enumerate(None, &Blacklist::default(), &mut out), 0);
    }

    #[test]
    fn empty_task_directory_enumerates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = [Tid::default(); 4];
        assert_eq!(
            ProcTasks::at(dir.path()).enumerate(None, &Blacklist::default(), &mut out),
            0
        );
    }

    #[test]
    fn reads_name_and_state() {
        let dir = tempfile::tempdir().unwrap();
        fake_task(dir.path(), 7, Some("threaded-ml\n"), Some("7 (threaded-ml) R 1 7"));
        fake_task(dir.path(), 8, None, Some("garbage"));
        let tasks = ProcTasks::at(dir.path());

        assert_eq!(tasks.read_name(Tid::new(7)).unwrap(), "threaded-ml");
        assert_eq!(tasks.read_state(Tid::new(7)), RunState::Running);
        assert!(tasks.read_name(Tid::new(8)).is_none());
        assert_eq!(tasks.read_state(Tid::new(8)), RunState::Unknown);
        assert_eq!(tasks.read_state(Tid::new(9)), RunState::Unknown);
    }

    #[test]
    fn reads_live_threads_of_this_process() {
        let tasks = ProcTasks::current_process();
        let mut out = [Tid::default(); 256];
        let count = tasks.enumerate(None, &Blacklist::default(), &mut out);
        assert!(count >= 1);
        let me = Tid::new(unsafe { libc::syscall(libc::SYS_gettid) } as u64);
        assert!(out[..count].contains(&me));
        assert!(tasks.read_name(me).is_some());
        assert_ne!(tasks.read_state(me), RunState::Unknown);
    }
}

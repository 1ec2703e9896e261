//! Program resolution and `execve` for forked children.
//!
//! The PATH search happens before forking; the child only walks the
//! precomputed candidate list.

use std::ffi::CString;

use nsattach_shared::errors::{NsattachError, NsattachResult};

use super::cstr::CStringArray;
use super::raw;

pub(crate) struct ExecTarget {
    argv: CStringArray,
    candidates: Vec<CString>,
}

impl ExecTarget {
    /// `argv[0]` is `program`, followed by `args`.
    pub(crate) fn new(program: &str, args: &[String]) -> NsattachResult<Self> {
        let argv = CStringArray::from_strs(
            std::iter::once(program).chain(args.iter().map(String::as_str)),
        )
        .map_err(|_| NsattachError::InvalidArgument("argument contains a NUL byte".into()))?;

        Ok(Self {
            argv,
            candidates: Vec::new(),
        })
    }

    pub(crate) fn program(&self) -> String {
        self.argv
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Compute the paths `exec` will try, in order.
    ///
    /// A program containing a slash is used as is. Otherwise each PATH
    /// entry is tried; an empty entry means the working directory.
    pub(crate) fn resolve(&mut self, path_var: Option<&str>) {
        self.candidates.clear();

        let Some(program) = self.argv.first().map(|p| p.to_bytes().to_vec()) else {
            return;
        };
        if program.is_empty() {
            return;
        }
        if program.contains(&b'/') {
            if let Ok(path) = CString::new(program) {
                self.candidates.push(path);
            }
            return;
        }

        for dir in path_var.unwrap_or_default().split(':') {
            let mut full = if dir.is_empty() {
                b"./".to_vec()
            } else {
                let mut d = dir.as_bytes().to_vec();
                if !d.ends_with(b"/") {
                    d.push(b'/');
                }
                d
            };
            full.extend_from_slice(&program);
            if let Ok(path) = CString::new(full) {
                self.candidates.push(path);
            }
        }
    }

    /// Replace the process image. Returns only on failure, with the errno
    /// to report.
    ///
    /// Async-signal-safe. Like execvp, misses (ENOENT, ENOTDIR, ...) move
    /// on to the next candidate and EACCES wins over ENOENT if nothing runs.
    pub(crate) fn exec(&self, envp: &CStringArray) -> i32 {
        let mut saw_eacces = false;

        for candidate in &self.candidates {
            unsafe { libc::execve(candidate.as_ptr(), self.argv.as_ptr(), envp.as_ptr()) };
            match raw::errno() {
                libc::ENOENT | libc::ENOTDIR | libc::ESTALE | libc::ENODEV | libc::ETIMEDOUT => {}
                libc::EACCES => saw_eacces = true,
                other => return other,
            }
        }

        if saw_eacces { libc::EACCES } else { libc::ENOENT }
    }

    #[cfg(test)]
    pub(crate) fn candidates(&self) -> Vec<String> {
        self.candidates
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect()
    }
}

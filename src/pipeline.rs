//! Command pipeline: classifies input lines, sequences exactly one
//! in-flight remote execution at a time, and keeps the client-held working
//! directory equal to the real one inside the sandbox.
//!
//! Every backend round-trip (start, execute, extend, stop, and completion
//! listings) runs on a spawned task and reports back through the event
//! channel, so the reducer itself never awaits the network and the
//! countdown keeps ticking during slow calls.
//!
//! The backend has no persistent shell process, so every remote command is
//! prefixed with a directory-restoring clause; `cd` itself is resolved by
//! the backend (`cd <tracked> && cd <target> && pwd`) and the tracked
//! directory is only ever overwritten with the `pwd` string the backend
//! prints back, never with a locally concatenated path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{
    ExecuteResponse, ExtendResponse, SandboxBackend, StartRequest, StartResponse,
};
use crate::completion::{self, TabRequest};
use crate::config::{Config, Identity};
use crate::error::BackendError;
use crate::format::{render_listing, render_output};
use crate::record::RecordStore;
use crate::session::SessionController;
use crate::transcript::{LineKind, Terminal};

/// Where a freshly started shell begins.
const HOME_DIR: &str = "/root";

/// What an in-flight execute call was for.
#[derive(Debug)]
pub enum ExecKind {
    /// A user command sent verbatim (plus the directory prefix).
    Generic { command: String },
    /// A directory change; on success the backend's `pwd` output becomes
    /// the tracked directory.
    ChangeDir { target: String },
}

/// Events delivered back to the reducer from spawned request tasks. The
/// epoch tag lets a response that outlived its session be discarded.
#[derive(Debug)]
pub enum ShellEvent {
    Exec {
        epoch: u64,
        kind: ExecKind,
        result: Result<ExecuteResponse, BackendError>,
    },
    TabListing {
        epoch: u64,
        /// Input line at dispatch time; any keystroke since invalidates
        /// the completion.
        snapshot: String,
        request: TabRequest,
        result: Result<ExecuteResponse, BackendError>,
    },
    Started {
        result: Result<StartResponse, BackendError>,
    },
    Extended {
        epoch: u64,
        result: Result<ExtendResponse, BackendError>,
    },
    TornDown {
        result: Result<(), BackendError>,
    },
}

#[derive(Debug)]
struct Pending {
    epoch: u64,
    placeholder: Option<usize>,
}

/// The interactive shell core: session controller, terminal view model,
/// tracked working directory, and the single-command-at-a-time discipline
/// that doubles as the concurrency control for all of them.
pub struct Shell {
    backend: Arc<dyn SandboxBackend>,
    pub session: SessionController,
    pub terminal: Terminal,
    current_dir: String,
    terminal_width: usize,
    pending: Option<Pending>,
    events_tx: mpsc::UnboundedSender<ShellEvent>,
    /// Set by `exit`; the quit itself waits for the teardown outcome.
    quitting: bool,
    should_quit: bool,
}

impl Shell {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        config: &Config,
        identity: Option<Identity>,
    ) -> (Self, mpsc::UnboundedReceiver<ShellEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = SessionController::new(
            RecordStore::new(config.record_path.clone()),
            identity,
            config.session_hours,
        );
        (
            Self {
                backend,
                session,
                terminal: Terminal::new(),
                current_dir: HOME_DIR.to_string(),
                terminal_width: config.terminal_width,
                pending: None,
                events_tx,
                quitting: false,
                should_quit: false,
            },
            events_rx,
        )
    }

    /// A remote execution is outstanding; input is disabled until it
    /// resolves.
    pub fn busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Re-attach to a recorded session, if one is still alive.
    pub fn restore(&mut self, now: DateTime<Utc>) {
        self.session.restore(now, &mut self.terminal.transcript);
    }

    /// Submit the current input buffer. No-op while a command is in
    /// flight; the buffer is left untouched.
    pub fn submit(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let raw = self.terminal.take_input();
        let line = raw.trim().to_string();
        self.terminal.transcript.push(LineKind::Input, &line);
        if line.is_empty() {
            return;
        }

        let t = &mut self.terminal.transcript;
        if line == "clear" {
            t.clear();
            return;
        }
        if line == "exit" {
            t.push(LineKind::Output, "goodbye: tearing down the sandbox");
            match self.session.begin_stop(t) {
                Some(sandbox_id) => {
                    self.quitting = true;
                    self.spawn_teardown(sandbox_id);
                }
                None => self.should_quit = true,
            }
            return;
        }
        if line == "help" {
            for text in [
                "builtin commands:",
                "  start            provision a new sandbox",
                "  extend [hours]   push the session expiry forward (default 1)",
                "  clear            wipe the transcript",
                "  exit             tear down the sandbox and quit",
                "anything else runs inside the sandbox",
            ] {
                t.push(LineKind::Output, text);
            }
            return;
        }
        if line == "start" {
            if let Some(req) = self.session.begin_start(t) {
                self.spawn_start(req);
            }
            return;
        }
        if line == "extend" || line.starts_with("extend ") {
            let hours = match line.strip_prefix("extend").map(str::trim) {
                Some("") | None => Some(1),
                Some(rest) => rest.parse::<u32>().ok(),
            };
            match hours {
                Some(hours) => {
                    if let Some(sandbox_id) = self.session.begin_extend(t) {
                        self.spawn_extend(sandbox_id, hours);
                    }
                }
                None => {
                    t.push(LineKind::Error, "usage: extend <hours>");
                }
            }
            return;
        }
        if let Some(target) = line.strip_prefix("cd ").map(str::trim) {
            if !target.is_empty() {
                self.dispatch_cd(target);
                return;
            }
        }
        if !self.session.is_active() {
            self.terminal.transcript.push(
                LineKind::Error,
                "no active sandbox: type 'start' to create one",
            );
            return;
        }
        self.dispatch_generic(line);
    }

    fn dispatch_cd(&mut self, target: &str) {
        if !self.session.is_active() {
            self.terminal.transcript.push(
                LineKind::Error,
                "no active sandbox: type 'start' to create one",
            );
            return;
        }
        // The tracked directory is quoted because it may contain
        // whitespace adopted verbatim from a previous pwd.
        let command = format!("cd '{}' && cd {} && pwd", self.current_dir, target);
        self.spawn_exec(
            ExecKind::ChangeDir {
                target: target.to_string(),
            },
            command,
            None,
        );
    }

    fn dispatch_generic(&mut self, line: String) {
        let placeholder = self
            .terminal
            .transcript
            .push(LineKind::Output, "executing...");
        let command = format!("cd '{}' && {}", self.current_dir, line);
        self.spawn_exec(ExecKind::Generic { command: line }, command, Some(placeholder));
    }

    fn spawn_exec(&mut self, kind: ExecKind, command: String, placeholder: Option<usize>) {
        let epoch = self.session.epoch();
        let sandbox_id = self.session.sandbox_id().unwrap_or_default().to_string();
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        self.pending = Some(Pending { epoch, placeholder });
        tokio::spawn(async move {
            let result = backend.execute(&sandbox_id, &command).await;
            let _ = tx.send(ShellEvent::Exec { epoch, kind, result });
        });
    }

    fn spawn_start(&mut self, req: StartRequest) {
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.start(req).await;
            let _ = tx.send(ShellEvent::Started { result });
        });
    }

    fn spawn_extend(&mut self, sandbox_id: String, hours: u32) {
        let epoch = self.session.epoch();
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.extend(&sandbox_id, hours).await;
            let _ = tx.send(ShellEvent::Extended { epoch, result });
        });
    }

    fn spawn_teardown(&mut self, sandbox_id: String) {
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.stop(&sandbox_id).await;
            let _ = tx.send(ShellEvent::TornDown { result });
        });
    }

    /// Reducer for events coming back from spawned request tasks.
    pub fn apply(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::Exec { epoch, kind, result } => self.apply_exec(epoch, kind, result),
            ShellEvent::TabListing {
                epoch,
                snapshot,
                request,
                result,
            } => self.apply_tab(epoch, snapshot, request, result),
            ShellEvent::Started { result } => {
                self.session.finish_start(result, &mut self.terminal.transcript);
                if self.session.is_active() {
                    self.current_dir = HOME_DIR.to_string();
                }
            }
            ShellEvent::Extended { epoch, result } => {
                if epoch != self.session.epoch() || !self.session.is_active() {
                    debug!("discarding extend response from a superseded session");
                    return;
                }
                self.session.finish_extend(result, &mut self.terminal.transcript);
            }
            ShellEvent::TornDown { result } => {
                self.session.finish_stop(result, &mut self.terminal.transcript);
                if self.quitting {
                    self.should_quit = true;
                }
            }
        }
    }

    fn apply_exec(
        &mut self,
        epoch: u64,
        kind: ExecKind,
        result: Result<ExecuteResponse, BackendError>,
    ) {
        // The forced-expiry transition wins every race: a response from a
        // superseded session is dropped, never rendered.
        if epoch != self.session.epoch() || !self.session.is_active() {
            debug!("discarding execution response from a superseded session");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(index) = pending.placeholder {
            self.terminal.transcript.remove(index);
        }
        self.session.record_command();

        let t = &mut self.terminal.transcript;
        match kind {
            ExecKind::Generic { command } => match result {
                Ok(resp) if resp.success => {
                    if command == "ls" {
                        for row in render_listing(&resp.output, self.terminal_width) {
                            t.push(LineKind::Output, row);
                        }
                    } else {
                        for line in render_output(&resp.output) {
                            t.push_line(line);
                        }
                    }
                }
                Ok(resp) => {
                    if resp.output.trim().is_empty() {
                        t.push(
                            LineKind::Error,
                            format!("command exited with code {}", resp.exit_code),
                        );
                    } else {
                        for line in resp.output.lines() {
                            t.push(LineKind::Error, line);
                        }
                    }
                }
                Err(e) => {
                    t.push(LineKind::Error, format!("execution failed: {}", e));
                }
            },
            ExecKind::ChangeDir { target } => match result {
                Ok(resp) if resp.success => {
                    // The backend's own pwd is the only writer of the
                    // tracked directory.
                    if let Some(pwd) = resp.output.lines().rev().find(|l| !l.trim().is_empty()) {
                        self.current_dir = pwd.trim().to_string();
                    }
                }
                Ok(_) => {
                    t.push(
                        LineKind::Error,
                        format!("cd: cannot change directory to '{}'", target),
                    );
                }
                Err(e) => {
                    t.push(LineKind::Error, format!("cd: {}", e));
                }
            },
        }
    }

    /// Tab completion. Cycling through stored suggestions is local;
    /// anything else plans a one-off listing call that bypasses the
    /// pipeline lock and never touches the transcript or the tracked
    /// directory.
    pub fn complete_input(&mut self) {
        if self.pending.is_some() || self.terminal.input().is_empty() {
            return;
        }
        let input = self.terminal.input().to_string();
        if let Some(state) = self.terminal.tab_state_mut() {
            if state.completed_input() == input {
                let next = state.advance();
                self.terminal.set_input(next);
                return;
            }
        }
        if !self.session.is_active() {
            return;
        }
        let Some(request) = completion::plan(&input, &self.current_dir) else {
            return;
        };
        let epoch = self.session.epoch();
        let sandbox_id = self.session.sandbox_id().unwrap_or_default().to_string();
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.execute(&sandbox_id, &request.command).await;
            let _ = tx.send(ShellEvent::TabListing {
                epoch,
                snapshot: input,
                request,
                result,
            });
        });
    }

    fn apply_tab(
        &mut self,
        epoch: u64,
        snapshot: String,
        request: TabRequest,
        result: Result<ExecuteResponse, BackendError>,
    ) {
        if epoch != self.session.epoch() || !self.session.is_active() {
            return;
        }
        if self.terminal.input() != snapshot {
            debug!("input changed since the listing was requested; dropping suggestions");
            return;
        }
        let Ok(resp) = result else { return };
        if !resp.success {
            return;
        }
        if let Some((input, state)) = completion::resolve(&request, &resp.output) {
            self.terminal.set_input(input);
            self.terminal.set_tab_state(state);
        }
    }

    /// One-second countdown tick. When it forces an expiry, the teardown
    /// request goes to a spawned task, the pending execution (if any) is
    /// abandoned, and its placeholder removed.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let was_active = self.session.is_active();
        if let Some(sandbox_id) = self.session.tick(now, &mut self.terminal.transcript) {
            self.spawn_teardown(sandbox_id);
        }
        if was_active && !self.session.is_active() {
            if let Some(pending) = self.pending.take() {
                if let Some(index) = pending.placeholder {
                    self.terminal.transcript.remove(index);
                }
            }
        }
    }
}

//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;

use tokio::sync::{Mutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through a scripted runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Returns the arguments joined by spaces, without the program name.
    #[must_use]
    pub fn args_string(&self) -> String {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns `true` when the arguments start with the space-separated
    /// words in `prefix`.
    #[must_use]
    pub fn matches(&self, prefix: &str) -> bool {
        let joined = self.args_string();
        joined == prefix || joined.starts_with(&format!("{prefix} "))
    }

    /// Returns the value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .skip_while(|arg| arg.to_string_lossy() != flag)
            .nth(1)
            .map(|arg| arg.to_string_lossy().into_owned())
    }

    /// Returns `true` when `flag` appears anywhere in the arguments.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg.to_string_lossy() == flag)
    }
}

const fn output(code: Option<i32>, stdout: String, stderr: String) -> CommandOutput {
    CommandOutput {
        code,
        stdout,
        stderr,
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.responses
            .borrow_mut()
            .push_back(output(Some(0), String::new(), String::new()));
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.responses.borrow_mut().push_back(output(
            Some(code),
            String::new(),
            String::from("simulated failure"),
        ));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(output(code, stdout.into(), stderr.into()));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug)]
struct Route {
    prefix: String,
    responses: VecDeque<CommandOutput>,
}

/// Command runner that answers by matching the leading `az` subcommand
/// words (for example `vm encryption show`).
///
/// Each route holds a queue of responses; the final response of a queue is
/// sticky and repeats for every later matching call. When several routes
/// match, the longest prefix wins. Calls with no matching route fail to
/// spawn, which surfaces unexpected commands in tests.
#[derive(Clone, Debug, Default)]
pub struct RoutedRunner {
    routes: Rc<RefCell<Vec<Route>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl RoutedRunner {
    /// Creates a runner with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &str, response: CommandOutput) {
        let mut routes = self.routes.borrow_mut();
        if let Some(route) = routes.iter_mut().find(|route| route.prefix == prefix) {
            route.responses.push_back(response);
            return;
        }
        routes.push(Route {
            prefix: prefix.to_owned(),
            responses: VecDeque::from([response]),
        });
    }

    /// Queues a successful response whose stdout is `stdout`.
    pub fn respond(&self, prefix: &str, stdout: impl Into<String>) {
        self.push(prefix, output(Some(0), stdout.into(), String::new()));
    }

    /// Queues a failing response with the given exit code and stderr.
    pub fn respond_failure(&self, prefix: &str, code: i32, stderr: impl Into<String>) {
        self.push(prefix, output(Some(code), String::new(), stderr.into()));
    }

    /// Replaces every queued response for `prefix` with `stdout`.
    pub fn replace(&self, prefix: &str, stdout: impl Into<String>) {
        self.routes
            .borrow_mut()
            .retain(|route| route.prefix != prefix);
        self.respond(prefix, stdout);
    }

    /// Replaces every queued response for `prefix` with a failure.
    pub fn replace_failure(&self, prefix: &str, code: i32, stderr: impl Into<String>) {
        self.routes
            .borrow_mut()
            .retain(|route| route.prefix != prefix);
        self.respond_failure(prefix, code, stderr);
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the invocations whose arguments start with `prefix`.
    #[must_use]
    pub fn calls(&self, prefix: &str) -> Vec<CommandInvocation> {
        self.invocations
            .borrow()
            .iter()
            .filter(|call| call.matches(prefix))
            .cloned()
            .collect()
    }

    /// Counts the invocations whose arguments start with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.calls(prefix).len()
    }
}

impl CommandRunner for RoutedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let invocation = CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        };
        let mut routes = self.routes.borrow_mut();
        let route = routes
            .iter_mut()
            .filter(|route| invocation.matches(&route.prefix))
            .max_by_key(|route| route.prefix.len());
        let response = route.and_then(|route| {
            if route.responses.len() > 1 {
                route.responses.pop_front()
            } else {
                route.responses.front().cloned()
            }
        });
        let args_text = invocation.args_string();
        self.invocations.borrow_mut().push(invocation);
        response.ok_or_else(|| CommandError::Spawn {
            program: program.to_owned(),
            message: format!("no scripted route for: {args_text}"),
        })
    }
}

/// Routes every command the provisioning pipeline issues to a plausible
/// successful response.
pub fn script_provisioning_happy_path(runner: &RoutedRunner) {
    let sub = "/subscriptions/0000/resourceGroups/testrg";
    runner.respond("group create", format!(r#"{{"id":"{sub}","name":"testrg"}}"#));
    runner.respond("ad app create", r#"{"appId":"app-123"}"#);
    runner.respond("ad sp create", r#"{"id":"sp-object"}"#);
    runner.respond("ad sp show", r#"{"appId":"app-123"}"#);
    runner.respond(
        "ad app credential reset",
        r#"{"appId":"app-123","password":"generated-secret","tenant":"t"}"#,
    );
    runner.respond("role assignment create", r#"{"id":"ra"}"#);
    runner.respond(
        "keyvault create",
        format!(
            r#"{{"id":"{sub}/providers/Microsoft.KeyVault/vaults/testkv","properties":{{"vaultUri":"https://testkv.vault.azure.net/"}}}}"#
        ),
    );
    runner.respond("keyvault set-policy", "{}");
    runner.respond(
        "keyvault key create",
        r#"{"key":{"kid":"https://testkv.vault.azure.net/keys/testkek/0123"}}"#,
    );
    runner.respond(
        "network vnet create",
        format!(r#"{{"newVNet":{{"id":"{sub}/vnet"}}}}"#),
    );
    runner.respond(
        "network public-ip create",
        format!(r#"{{"publicIp":{{"id":"{sub}/pip"}}}}"#),
    );
    runner.respond(
        "network nsg create",
        format!(r#"{{"NewNSG":{{"id":"{sub}/nsg"}}}}"#),
    );
    runner.respond(
        "network nic create",
        format!(r#"{{"NewNIC":{{"id":"{sub}/nic"}}}}"#),
    );
    runner.respond(
        "vm create",
        format!(r#"{{"id":"{sub}/vm","publicIpAddress":"203.0.113.9"}}"#),
    );
    runner.respond("storage account create", r#"{"name":"testsa"}"#);
    runner.respond(
        "storage account keys list",
        r#"[{"keyName":"key1","value":"account-key"}]"#,
    );
    runner.respond("storage container create", r#"{"created":true}"#);
    runner.respond("storage blob upload", "{}");
    runner.respond(
        "storage blob generate-sas",
        r#""https://testsa.blob.core.windows.net/c/blob?sig=abc""#,
    );
    runner.respond("vm extension set", "{}");
    runner.respond("storage blob exists", r#"{"exists":true}"#);
    runner.respond(
        "vm run-command invoke",
        r#"{"value":[{"code":"ProvisioningState/succeeded","message":"Complete!"}]}"#,
    );
}

/// Produces an `az vm encryption show` payload with a single status
/// message, optional substatus volume states, and per-disk enabled flags.
#[must_use]
pub fn encryption_show_json(
    code: &str,
    message: &str,
    volumes: Option<(&str, &str)>,
    disks_enabled: &[Option<bool>],
) -> String {
    let disks = disks_enabled
        .iter()
        .enumerate()
        .map(|(index, enabled)| {
            let settings = enabled.map_or_else(String::new, |flag| {
                format!(r#"{{"enabled":{flag}}}"#)
            });
            format!(r#"{{"name":"disk{index}","encryptionSettings":[{settings}]}}"#)
        })
        .collect::<Vec<_>>()
        .join(",");
    let substatus = volumes.map_or_else(String::new, |(os, data)| {
        let inner = format!(r#"{{\"os\": \"{os}\", \"data\": \"{data}\"}}"#);
        format!(r#"{{"code":"ComponentStatus/vmsubstatus/succeeded","message":"{inner}"}}"#)
    });
    format!(
        r#"{{"disks":[{disks}],"status":[{{"code":"{code}","displayStatus":"","message":"{message}"}}],"substatus":[{substatus}]}}"#
    )
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    ///
    /// An empty value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                if value.is_empty() {
                    env::remove_var(key);
                } else {
                    env::set_var(key, value);
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

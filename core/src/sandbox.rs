use crate::command;
use crate::command::SandboxCommand;
use crate::config::Config;
use crate::docker;
use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::plan;
use crate::plan::Plan;
use crate::policy;
use crate::presets;
use crate::resolv;
use crate::validate;
use crate::wrappers;

/// A validated, fully planned sandbox.
///
/// Construction does all host lookups (presets, globs, PATH discovery,
/// docker socket, resolver symlink) and is terminal on error. The resulting
/// plan is immutable; [`Sandbox::build_command`] only materializes backing
/// files per invocation, so concurrent callers are fine.
pub struct Sandbox {
    environment: Environment,
    plan: Plan,
}

impl Sandbox {
    /// Plan a sandbox for the given policy against the given host snapshot.
    /// The sandbox keeps its own copy of the snapshot; later mutations by the
    /// caller have no effect.
    pub fn new(config: &Config, environment: &Environment) -> Result<Self> {
        validate::validate(config, environment)?;

        let selection = presets::parse_selection(config.filesystem.presets.as_deref())
            .map_err(SandboxErr::HostLookup)?;
        config.emit_debug(&format!("presets: {selection:?}"));

        let mut policy_mounts = presets::expand(selection, environment)?;
        policy_mounts.extend(
            config
                .filesystem
                .mounts
                .iter()
                .filter(|mount| mount.kind.is_policy())
                .cloned(),
        );

        let resolved = policy::resolve(&policy_mounts, environment)?;
        config.emit_debug(&format!(
            "policy: {} rules resolved to {} mounts",
            policy_mounts.len(),
            resolved.mounts.len()
        ));

        let direct = plan::order_direct_mounts(config, environment)?;

        let wrapper_plan = wrappers::plan(&config.commands, environment)?;
        if !wrapper_plan.data_mounts.is_empty() {
            config.emit_debug(&format!(
                "wrappers: {} payloads, {} launcher binds",
                wrapper_plan.data_mounts.len(),
                wrapper_plan.launcher_binds.len()
            ));
        }

        let docker_mount = docker::plan(config.docker, &environment.host_env)?;
        config.emit_debug(if config.docker {
            "docker: exposing socket"
        } else {
            "docker: masking socket"
        });

        let dns = if config.network {
            resolv::plan()
        } else {
            Vec::new()
        };
        if !dns.is_empty() {
            config.emit_debug("dns: preserving resolver directory under /run");
        }

        let plan = plan::assemble(
            config,
            environment,
            &resolved,
            &direct,
            &dns,
            &wrapper_plan,
            &docker_mount,
        )?;

        Ok(Self {
            environment: environment.clone(),
            plan,
        })
    }

    /// Plan against the calling process's environment.
    pub fn from_host(config: &Config) -> Result<Self> {
        Self::new(config, &Environment::from_host()?)
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Build one unstarted invocation of `argv` inside the sandbox.
    pub fn build_command(&self, argv: &[String]) -> Result<SandboxCommand> {
        command::build(&self.plan, &self.environment, argv)
    }
}

//! Imperative create/delete command pairs.
//!
//! The create command's standard output is the resource's state. In the
//! default `json` format it is decoded so dependents can reference
//! fields of it (`${key.json.api_key_info.uuid}`). The delete command
//! receives that output in `RIGGING_CREATE_STDOUT`, so it can act on the
//! identifier recorded at create instead of looking it up by name.

use async_trait::async_trait;
use rigging_common::constants::CREATE_STDOUT_ENV;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::{REDACTED, Sensitive};
use rigging_common::types::Operation;
use rigging_common::value::Value;
use rigging_compose::schema::{ResourceConfig, ShellCommandConfig};

use super::{Attributes, EvaluatedConfig, OperationContext, Provider, opt_map, opt_text, plain, text};
use crate::exec::{CommandSpec, ExecOutput};

const SHELL: &str = "sh";

/// Provider for [`ShellCommandConfig`] resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellProvider;

fn unpack<'a>(ctx: &OperationContext<'a>) -> Result<&'a ShellCommandConfig<Sensitive<Value>>> {
    match ctx.config {
        ResourceConfig::ShellCommand(c) => Ok(c),
        _ => Err(ctx.wrong_kind("shell")),
    }
}

/// Describes `raw` for an error message without revealing secret text.
fn describe_raw(raw: &str, secret: bool) -> String {
    if secret {
        format!("{REDACTED} ({} bytes)", raw.len())
    } else {
        raw.to_string()
    }
}

/// Decodes structured command output.
///
/// # Errors
///
/// Returns `RiggingError::ParseOutput` carrying the raw output, or only
/// its length when the output is secret.
pub fn parse_json_output(resource: &str, stdout: &Sensitive<String>) -> Result<Sensitive<Value>> {
    let parsed: serde_json::Value =
        serde_json::from_str(stdout.expose().trim()).map_err(|e| RiggingError::ParseOutput {
            resource: resource.to_string(),
            message: e.to_string(),
            raw: describe_raw(stdout.expose(), stdout.is_secret()),
        })?;
    Ok(Sensitive::new(Value::from_json(&parsed), stdout.is_secret()))
}

struct Invocation {
    command: Sensitive<String>,
    env: Sensitive<Vec<(String, String)>>,
    dir: Option<String>,
}

impl Invocation {
    fn new(ctx: &OperationContext<'_>, command: Sensitive<String>) -> Result<Self> {
        let config = unpack(ctx)?;
        let env = opt_map(ctx, "environment", config.environment.as_ref())?
            .map(|vars| vars.into_iter().map(|(k, v)| (k, v.render())).collect());
        let dir = opt_text(ctx, "dir", config.dir.as_ref())?.map(Sensitive::into_exposed);
        Ok(Self { command, env, dir })
    }

    const fn secret(&self) -> bool {
        self.command.is_secret() || self.env.is_secret()
    }

    async fn run(&self, resource: &str, extra_env: Option<(&str, &str)>) -> Result<ExecOutput> {
        let mut spec = CommandSpec::new(SHELL).args(["-c", self.command.expose().as_str()]);
        for (key, value) in self.env.expose() {
            spec = spec.env(key, value);
        }
        if let Some((key, value)) = extra_env {
            spec = spec.env(key, value);
        }
        if let Some(dir) = &self.dir {
            spec = spec.current_dir(dir);
        }
        tracing::info!(resource, command = %self.command, "running shell command");
        let output = spec.run().await?;
        if output.success() {
            Ok(output)
        } else {
            Err(RiggingError::Command {
                program: format!("{SHELL} -c ({resource})"),
                exit_code: output.exit_code,
                stderr: describe_raw(output.stderr.trim(), self.secret()),
            })
        }
    }
}

#[async_trait]
impl Provider for ShellProvider {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn retry_safe(&self, _operation: Operation, config: &EvaluatedConfig) -> bool {
        match config {
            ResourceConfig::ShellCommand(c) => c
                .retryable
                .as_ref()
                .and_then(|v| v.expose().as_bool())
                .unwrap_or(false),
            _ => false,
        }
    }

    fn skip_unchanged(&self) -> bool {
        true
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let config = unpack(ctx)?;
        let command = text(ctx, "create", &config.create)?;
        let format = opt_text(ctx, "format", config.format.as_ref())?
            .map_or_else(|| "json".to_string(), Sensitive::into_exposed);

        let invocation = Invocation::new(ctx, command)?;
        let secret = invocation.secret();
        let output = invocation.run(ctx.name, None).await?;

        let stdout = Sensitive::new(output.stdout, secret);
        let mut attrs = Attributes::from([
            ("exit_code".to_string(), plain(i64::from(output.exit_code))),
            (
                "stderr".to_string(),
                Sensitive::new(Value::String(output.stderr), secret),
            ),
        ]);
        if format == "json" {
            let _ = attrs.insert("json".into(), parse_json_output(ctx.name, &stdout)?);
        }
        let _ = attrs.insert("stdout".into(), stdout.map(Value::String));
        Ok(attrs)
    }

    /// Replaces the resource: the delete command runs against the recorded
    /// output before the create command runs with the new configuration.
    async fn update(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        if ctx.prior.is_some() {
            tracing::info!(resource = %ctx.name, "configuration changed, replacing");
            self.delete(ctx).await?;
        }
        self.create(ctx).await
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let config = unpack(ctx)?;
        let Some(command) = opt_text(ctx, "delete", config.delete.as_ref())? else {
            tracing::debug!(resource = %ctx.name, "no delete command, nothing to do");
            return Ok(());
        };
        let recorded = ctx
            .prior
            .and_then(|attrs| attrs.get("stdout"))
            .map(|v| v.expose().render())
            .unwrap_or_default();
        let invocation = Invocation::new(ctx, command)?;
        let _ = invocation
            .run(ctx.name, Some((CREATE_STDOUT_ENV, &recorded)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config(create: Sensitive<Value>, delete: Option<&str>) -> EvaluatedConfig {
        ResourceConfig::ShellCommand(ShellCommandConfig {
            create,
            delete: delete.map(plain),
            environment: Some(plain(Value::Map(BTreeMap::from([(
                "KEY_NAME".to_string(),
                Value::from("workshop"),
            )])))),
            format: None,
            retryable: None,
            dir: None,
        })
    }

    fn ctx<'a>(config: &'a EvaluatedConfig, prior: Option<&'a Attributes>) -> OperationContext<'a> {
        OperationContext {
            name: "model-key",
            config,
            prior,
        }
    }

    #[tokio::test]
    async fn create_parses_json_stdout() {
        let config = config(
            plain(r#"printf '{"api_key_info":{"name":"%s","uuid":"u-1"}}' "$KEY_NAME""#),
            None,
        );
        let attrs = ShellProvider.create(&ctx(&config, None)).await.expect("created");
        let json = attrs["json"].expose();
        assert_eq!(
            json.get_path(&["api_key_info", "name"]).and_then(Value::as_str),
            Some("workshop")
        );
        assert_eq!(attrs["exit_code"].expose(), &Value::Integer(0));
        assert!(!attrs["json"].is_secret());
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error_with_raw_output() {
        let config = config(plain("echo 'Unauthorized'"), None);
        let err = ShellProvider.create(&ctx(&config, None)).await.unwrap_err();
        match err {
            RiggingError::ParseOutput { resource, raw, .. } => {
                assert_eq!(resource, "model-key");
                assert_eq!(raw.trim(), "Unauthorized");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn secret_command_output_is_secret_and_redacted_on_error() {
        let secret_cmd = Sensitive::secret(Value::from("echo token=dop_v1_abc"));
        let config = config(secret_cmd, None);
        let err = ShellProvider.create(&ctx(&config, None)).await.unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("dop_v1_abc"), "got: {msg}");
        assert!(msg.contains(REDACTED), "got: {msg}");

        let ok = ResourceConfig::ShellCommand(ShellCommandConfig {
            create: Sensitive::secret(Value::from("echo '{\"k\":1}'")),
            delete: None,
            environment: None,
            format: None,
            retryable: None,
            dir: None,
        });
        let attrs = ShellProvider.create(&ctx(&ok, None)).await.expect("created");
        assert!(attrs["json"].is_secret());
        assert!(attrs["stdout"].is_secret());
    }

    #[tokio::test]
    async fn text_format_skips_decoding() {
        let config = ResourceConfig::ShellCommand(ShellCommandConfig {
            create: plain("echo plain text"),
            delete: None,
            environment: None,
            format: Some(plain("text")),
            retryable: None,
            dir: None,
        });
        let attrs = ShellProvider.create(&ctx(&config, None)).await.expect("created");
        assert!(!attrs.contains_key("json"));
        assert_eq!(attrs["stdout"].expose(), &Value::from("plain text\n"));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let config = config(plain("echo nope >&2; exit 7"), None);
        let err = ShellProvider.create(&ctx(&config, None)).await.unwrap_err();
        match err {
            RiggingError::Command {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 7);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn delete_receives_recorded_stdout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("deleted");
        let delete = format!("printf '%s' \"$RIGGING_CREATE_STDOUT\" > '{}'", out.display());
        let config = config(plain("true"), Some(&delete));
        let prior = Attributes::from([("stdout".to_string(), plain(r#"{"uuid":"u-9"}"#))]);
        ShellProvider
            .delete(&ctx(&config, Some(&prior)))
            .await
            .expect("deleted");
        let seen = std::fs::read_to_string(&out).expect("written");
        assert_eq!(seen, r#"{"uuid":"u-9"}"#);
    }

    #[tokio::test]
    async fn update_deletes_the_recorded_resource_before_creating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("log");
        let create = format!("echo create >> '{}'; echo '{{\"id\":2}}'", log.display());
        let delete = format!(
            "printf 'delete %s\\n' \"$RIGGING_CREATE_STDOUT\" >> '{}'",
            log.display()
        );
        let config = config(plain(create), Some(&delete));
        let prior = Attributes::from([("stdout".to_string(), plain(r#"{"id":1}"#))]);
        let attrs = ShellProvider
            .update(&ctx(&config, Some(&prior)))
            .await
            .expect("updated");
        assert_eq!(
            attrs["json"].expose().get_path(&["id"]),
            Some(&Value::Integer(2))
        );
        let seen = std::fs::read_to_string(&log).expect("written");
        assert_eq!(seen, "delete {\"id\":1}\ncreate\n");
    }

    #[tokio::test]
    async fn delete_without_command_is_a_no_op_and_repeatable() {
        let config = config(plain("true"), None);
        ShellProvider.delete(&ctx(&config, None)).await.expect("first");
        ShellProvider.delete(&ctx(&config, None)).await.expect("second");
    }

    #[test]
    fn retry_safety_follows_the_flag() {
        let mut config = config(plain("true"), None);
        assert!(!ShellProvider.retry_safe(Operation::Create, &config));
        if let ResourceConfig::ShellCommand(c) = &mut config {
            c.retryable = Some(plain(true));
        }
        assert!(ShellProvider.retry_safe(Operation::Create, &config));
        assert!(ShellProvider.skip_unchanged());
    }
}

//! The workshop stacks shipped in `stacks/` parse, check and plan.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeSet;

use rigging_common::secret::Sensitive;
use rigging_common::types::{PlanKind, ResourceKind};
use rigging_common::value::Value;
use rigging_compose::Stack;
use rigging_compose::expr::Reference;

const CLUSTER: &str = include_str!("../../../stacks/01-cluster.rig");
const KAGENT: &str = include_str!("../../../stacks/02-kagent.rig");
const MONITORING: &str = include_str!("../../../stacks/03-monitoring.rig");
const AGENTS: &str = include_str!("../../../stacks/04-agents.rig");
const GENAI_SETUP: &str = include_str!("../../../stacks/instructor-genai-setup.rig");
const MODEL_KEY: &str = include_str!("../../../stacks/instructor-model-key.rig");

fn batches(stack: &Stack, kind: PlanKind) -> Vec<Vec<String>> {
    stack
        .plan(kind)
        .expect("plan")
        .batches()
        .iter()
        .map(|batch| {
            let mut names: Vec<String> = batch.iter().map(|s| s.name.clone()).collect();
            names.sort_unstable();
            names
        })
        .collect()
}

fn deps(stack: &Stack, name: &str) -> BTreeSet<String> {
    stack.dependencies_of(name).cloned().unwrap_or_default()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

/// Renders a parameter-only output, substituting `<name>` for each parameter.
fn render_output(stack: &Stack, name: &str) -> String {
    let output = stack
        .outputs()
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| panic!("{name} output"));
    let value = output
        .value
        .evaluate(&|reference| match reference {
            Reference::Param(param) => Ok(Sensitive::plain(Value::from(format!("<{param}>")))),
            other => panic!("unexpected reference {other}"),
        })
        .expect("evaluate");
    value.expose().as_str().expect("text output").to_string()
}

#[test]
fn cluster_stack() {
    let stack = Stack::parse("01-cluster", CLUSTER).expect("parse");
    assert_eq!(stack.resources().len(), 1);
    assert_eq!(stack.resources()[0].kind(), ResourceKind::Cluster);
    let kubeconfig = stack
        .outputs()
        .iter()
        .find(|o| o.name == "kubeconfig")
        .expect("kubeconfig output");
    assert!(kubeconfig.secret);
    assert!(stack.params().iter().any(|p| p.name == "token" && p.secret));
}

#[test]
fn kagent_waits_for_crds_and_secret() {
    let stack = Stack::parse("02-kagent", KAGENT).expect("parse");
    assert_eq!(
        deps(&stack, "kagent"),
        set(&["kagent-crds", "kagent-ns", "kagent-openai"])
    );
    assert_eq!(
        batches(&stack, PlanKind::Apply),
        vec![
            vec!["kagent-ns".to_string()],
            vec!["kagent-crds".to_string(), "kagent-openai".to_string()],
            vec!["kagent".to_string()],
        ]
    );
}

#[test]
fn monitoring_runs_independent_releases_together() {
    let stack = Stack::parse("03-monitoring", MONITORING).expect("parse");
    let apply = batches(&stack, PlanKind::Apply);
    assert_eq!(
        apply[0],
        vec!["apps".to_string(), "metrics-server".to_string(), "monitoring".to_string()]
    );
    assert_eq!(
        deps(&stack, "podinfo"),
        set(&["apps", "kube-prometheus-stack"])
    );
    assert_eq!(apply.last().expect("last batch"), &vec!["podinfo".to_string()]);
}

#[test]
fn agents_chain_and_reverse_teardown() {
    let stack = Stack::parse("04-agents", AGENTS).expect("parse");
    assert_eq!(deps(&stack, "pulumi-remote-mcp"), set(&["pulumi-access-token"]));
    assert_eq!(deps(&stack, "pulumi-agent"), set(&["pulumi-remote-mcp"]));
    assert_eq!(deps(&stack, "orchestrator-agent"), set(&["pulumi-agent"]));
    assert!(deps(&stack, "podinfo-faulty").is_empty());

    let destroy_plan = stack.plan(PlanKind::Destroy).expect("plan");
    let destroy = destroy_plan.order();
    let position = |name: &str| destroy.iter().position(|n| *n == name).expect("planned");
    assert!(position("orchestrator-agent") < position("pulumi-agent"));
    assert!(position("pulumi-agent") < position("pulumi-remote-mcp"));
    assert!(position("pulumi-remote-mcp") < position("pulumi-access-token"));
}

#[test]
fn agents_stack_explains_the_demo() {
    let stack = Stack::parse("04-agents", AGENTS).expect("parse");
    let instructions = render_output(&stack, "demoInstructions");
    assert!(instructions.contains("kubectl get pods -n <appsNamespace> -l app=podinfo-faulty"));
    assert!(instructions.contains("\"Investigate why podinfo-faulty is not running and fix it\""));
    assert!(instructions.contains("memory request from 8Gi to 128Mi"));
}

#[test]
fn genai_setup_prints_test_and_environment_snippets() {
    let stack = Stack::parse("instructor-genai-setup", GENAI_SETUP).expect("parse");
    let test = render_output(&stack, "testCommand");
    assert!(test.starts_with("curl -s -X POST \"<inferenceEndpoint>/chat/completions\""));
    assert!(test.contains(r#""model": "<model>""#));
    assert!(test.contains(r#""temperature": 0.7, "max_tokens": 100"#));

    let snippet = render_output(&stack, "escEnvironmentSnippet");
    assert!(snippet.starts_with("# Add this to your workshop-workload-env ESC environment:\n"));
    assert!(snippet.contains("    endpoint: \"<inferenceEndpoint>\"\n    model: \"<model>\"\n"));
    assert!(snippet.contains("fn::secret: \"<paste-model-access-key-here>\""));
    assert!(!stack.outputs().iter().any(|o| o.name == "escEnvironmentSnippet" && o.secret));
}

#[test]
fn instructor_stacks_export_secret_keys() {
    for (name, source) in [("instructor-genai-setup", GENAI_SETUP), ("instructor-model-key", MODEL_KEY)] {
        let stack = Stack::parse(name, source).expect("parse");
        let secret: Vec<&str> = stack
            .outputs()
            .iter()
            .filter(|o| o.secret)
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(secret, vec!["llmApiKey", "openaiApiKey"], "{name}");
        assert!(stack
            .outputs()
            .iter()
            .filter(|o| o.name == "modelAccessKeyUuid")
            .all(|o| o.depends_on.contains("model-access-key")));
    }
}

#[test]
fn graph_renders_every_resource() {
    let stack = Stack::parse("02-kagent", KAGENT).expect("parse");
    let dot = stack.graph().to_dot();
    for name in ["kagent-ns", "kagent-openai", "kagent-crds", "kagent"] {
        assert!(dot.contains(&format!("\"{name}\"")), "{dot}");
    }
}

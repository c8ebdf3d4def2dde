use std::sync::Arc;

use plugboard_core::{CapabilityDescriptor, ParameterKind, ParameterSpec};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{typed_handler, Capability, NoArguments, Plugin};

pub const PLUGIN_NAME: &str = "software_builder";

/// Five fixed stages. Each one only reports what it was built from, which is
/// enough for a model to walk the sequence and for rejections to be visible.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareBuilderPlugin;

#[derive(Debug, Deserialize)]
struct DesignInput {
    requirements: String,
}

#[derive(Debug, Deserialize)]
struct ImplementInput {
    requirements: String,
    design: String,
}

#[derive(Debug, Deserialize)]
struct TestInput {
    requirements: String,
    design: String,
    implementation: String,
}

#[derive(Debug, Deserialize)]
struct DeployInput {
    requirements: String,
    design: String,
    implementation: String,
    test_results: String,
}

impl SoftwareBuilderPlugin {
    pub fn collect_requirements(&self) -> &'static str {
        info!(event_name = "plugin.software_builder.collect_requirements", "collecting requirements");
        "Requirements"
    }

    pub fn design(&self, requirements: &str) -> &'static str {
        info!(
            event_name = "plugin.software_builder.design",
            requirements, "designing from requirements"
        );
        "Design"
    }

    pub fn implement(&self, requirements: &str, design: &str) -> &'static str {
        info!(
            event_name = "plugin.software_builder.implement",
            requirements, design, "implementing from requirements and design"
        );
        "Implementation"
    }

    pub fn test(&self, requirements: &str, design: &str, implementation: &str) -> &'static str {
        info!(
            event_name = "plugin.software_builder.test",
            requirements, design, implementation, "testing implementation"
        );
        "Test Results"
    }

    pub fn deploy(
        &self,
        requirements: &str,
        design: &str,
        implementation: &str,
        test_results: &str,
    ) -> &'static str {
        info!(
            event_name = "plugin.software_builder.deploy",
            requirements, design, implementation, test_results, "deploying tested build"
        );
        "Deployment"
    }
}

fn text(name: &str) -> ParameterSpec {
    ParameterSpec::required(name, ParameterKind::String)
}

impl Plugin for SoftwareBuilderPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            (
                CapabilityDescriptor::new(
                    "collect_requirements",
                    "Collects requirements for the software project.",
                ),
                typed_handler(&self, |plugin: Arc<Self>, _: NoArguments| async move {
                    anyhow::Ok(json!(plugin.collect_requirements()))
                }),
            ),
            (
                CapabilityDescriptor::new("design", "Designs the software based on the requirements.")
                    .with_parameter(text("requirements")),
                typed_handler(&self, |plugin: Arc<Self>, input: DesignInput| async move {
                    anyhow::Ok(json!(plugin.design(&input.requirements)))
                }),
            ),
            (
                CapabilityDescriptor::new(
                    "implement",
                    "Implements the software based on the requirements and design.",
                )
                .with_parameter(text("requirements"))
                .with_parameter(text("design")),
                typed_handler(&self, |plugin: Arc<Self>, input: ImplementInput| async move {
                    anyhow::Ok(json!(plugin.implement(&input.requirements, &input.design)))
                }),
            ),
            (
                CapabilityDescriptor::new(
                    "test",
                    "Tests the software based on the requirements, design, and implementation.",
                )
                .with_parameter(text("requirements"))
                .with_parameter(text("design"))
                .with_parameter(text("implementation")),
                typed_handler(&self, |plugin: Arc<Self>, input: TestInput| async move {
                    anyhow::Ok(json!(plugin.test(
                        &input.requirements,
                        &input.design,
                        &input.implementation
                    )))
                }),
            ),
            (
                CapabilityDescriptor::new(
                    "deploy",
                    "Deploys the software based on the requirements, design, implementation, and test results.",
                )
                .with_parameter(text("requirements"))
                .with_parameter(text("design"))
                .with_parameter(text("implementation"))
                .with_parameter(text("test_results")),
                typed_handler(&self, |plugin: Arc<Self>, input: DeployInput| async move {
                    anyhow::Ok(json!(plugin.deploy(
                        &input.requirements,
                        &input.design,
                        &input.implementation,
                        &input.test_results
                    )))
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use plugboard_core::InvocationArguments;
    use serde_json::json;

    use super::SoftwareBuilderPlugin;
    use crate::Plugin;

    #[test]
    fn stages_return_fixed_artifacts() {
        let plugin = SoftwareBuilderPlugin;
        assert_eq!(plugin.collect_requirements(), "Requirements");
        assert_eq!(plugin.design("Requirements"), "Design");
        assert_eq!(plugin.implement("Requirements", "Design"), "Implementation");
        assert_eq!(plugin.test("Requirements", "Design", "Implementation"), "Test Results");
        assert_eq!(
            plugin.deploy("Requirements", "Design", "Implementation", "Test Results"),
            "Deployment"
        );
    }

    #[test]
    fn deploy_declares_all_four_inputs_in_order() {
        let capabilities = Arc::new(SoftwareBuilderPlugin).capabilities();
        let names = capabilities.iter().map(|(descriptor, _)| descriptor.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["collect_requirements", "design", "implement", "test", "deploy"]);

        let deploy = &capabilities[4].0;
        assert_eq!(deploy.parameters_schema()["required"], json!([
            "requirements",
            "design",
            "implementation",
            "test_results"
        ]));
    }

    #[tokio::test]
    async fn handlers_decode_arguments() {
        let capabilities = Arc::new(SoftwareBuilderPlugin).capabilities();
        let (_, implement) = &capabilities[2];

        let mut arguments = InvocationArguments::new();
        arguments.insert("requirements".to_string(), json!("Requirements"));
        arguments.insert("design".to_string(), json!("Design"));
        assert_eq!(implement.call(arguments).await.ok(), Some(json!("Implementation")));

        let mut missing = InvocationArguments::new();
        missing.insert("requirements".to_string(), json!("Requirements"));
        assert!(implement.call(missing).await.is_err());
    }
}

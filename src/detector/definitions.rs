use super::classifier::MarkerKind;
use super::Framework;

pub struct FrameworkDefinition {
    pub framework: Framework,
    pub marker_file: &'static str,
    pub marker: MarkerKind,
    pub dependencies: &'static [&'static str],
}

/// Detection table. Order is precedence: the first definition whose marker file is
/// present and accepted wins.
pub const FRAMEWORK_DEFINITIONS: &[FrameworkDefinition] = &[
    FrameworkDefinition {
        framework: Framework::NextJs,
        marker_file: "package.json",
        marker: MarkerKind::PackageManifest,
        dependencies: &["next"],
    },
    FrameworkDefinition {
        framework: Framework::React,
        marker_file: "package.json",
        marker: MarkerKind::PackageManifest,
        dependencies: &["react", "react-dom"],
    },
    FrameworkDefinition {
        framework: Framework::Express,
        marker_file: "package.json",
        marker: MarkerKind::PackageManifest,
        dependencies: &["express"],
    },
    FrameworkDefinition {
        framework: Framework::Django,
        marker_file: "requirements.txt",
        marker: MarkerKind::RequirementsList,
        dependencies: &["django"],
    },
    FrameworkDefinition {
        framework: Framework::Flask,
        marker_file: "requirements.txt",
        marker: MarkerKind::RequirementsList,
        dependencies: &["flask"],
    },
    FrameworkDefinition {
        framework: Framework::FastApi,
        marker_file: "requirements.txt",
        marker: MarkerKind::RequirementsList,
        dependencies: &["fastapi"],
    },
    FrameworkDefinition {
        framework: Framework::Django,
        marker_file: "pyproject.toml",
        marker: MarkerKind::PyProject,
        dependencies: &["django"],
    },
    FrameworkDefinition {
        framework: Framework::Flask,
        marker_file: "pyproject.toml",
        marker: MarkerKind::PyProject,
        dependencies: &["flask"],
    },
    FrameworkDefinition {
        framework: Framework::FastApi,
        marker_file: "pyproject.toml",
        marker: MarkerKind::PyProject,
        dependencies: &["fastapi"],
    },
    FrameworkDefinition {
        framework: Framework::DockerCompose,
        marker_file: "docker-compose.yml",
        marker: MarkerKind::ContainerDefinition,
        dependencies: &[],
    },
    FrameworkDefinition {
        framework: Framework::DockerCompose,
        marker_file: "docker-compose.yaml",
        marker: MarkerKind::ContainerDefinition,
        dependencies: &[],
    },
    FrameworkDefinition {
        framework: Framework::Dockerfile,
        marker_file: "Dockerfile",
        marker: MarkerKind::ContainerDefinition,
        dependencies: &[],
    },
];

pub fn definitions_for(framework: Framework) -> impl Iterator<Item = &'static FrameworkDefinition> {
    FRAMEWORK_DEFINITIONS
        .iter()
        .filter(move |def| def.framework == framework)
}

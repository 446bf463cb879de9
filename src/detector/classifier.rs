use serde_json::Value;

/// How a marker file's content is matched against a definition's dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// `package.json`
    PackageManifest,
    /// `requirements.txt`
    RequirementsList,
    /// `pyproject.toml`
    PyProject,
    /// `Dockerfile`, `docker-compose.yml`
    ContainerDefinition,
}

impl MarkerKind {
    pub fn accepts(&self, content: &str, dependencies: &[&str]) -> bool {
        match self {
            Self::PackageManifest => package_manifest_has_any(content, dependencies),
            Self::RequirementsList => requirements_have_any(content, dependencies),
            Self::PyProject => pyproject_has_any(content, dependencies),
            Self::ContainerDefinition => {
                dependencies.is_empty() || dependencies.iter().any(|dep| content.contains(dep))
            }
        }
    }
}

fn package_manifest_has_any(content: &str, dependencies: &[&str]) -> bool {
    let manifest: Value = match serde_json::from_str(content) {
        Ok(manifest) => manifest,
        Err(_) => return false,
    };

    ["dependencies", "devDependencies"].iter().any(|section| {
        manifest
            .get(section)
            .and_then(Value::as_object)
            .map(|deps| dependencies.iter().any(|dep| deps.contains_key(*dep)))
            .unwrap_or(false)
    })
}

/// Package name of a requirement line: everything before the first version operator.
pub(crate) fn requirement_name(line: &str) -> &str {
    let line = line.split('#').next().unwrap_or_default();
    let end = line.find(['=', '<', '>', '~', '!', '[', ';']).unwrap_or(line.len());
    line[..end].trim()
}

fn requirements_have_any(content: &str, dependencies: &[&str]) -> bool {
    content.lines().map(requirement_name).any(|name| {
        dependencies
            .iter()
            .any(|dep| name.eq_ignore_ascii_case(dep))
    })
}

fn pyproject_has_any(content: &str, dependencies: &[&str]) -> bool {
    let names = pyproject_dependency_names(content);
    if names.is_empty() {
        return false;
    }
    names
        .iter()
        .any(|name| dependencies.iter().any(|dep| name.eq_ignore_ascii_case(dep)))
}

/// Dependency names from `[tool.poetry.dependencies]`-style tables, plus the
/// `dependencies = [...]` array of a `[project]` table.
fn pyproject_dependency_names(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut section = String::new();
    let mut in_array = false;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if in_array {
            if line.starts_with(']') {
                in_array = false;
                continue;
            }
            collect_quoted_requirements(line, &mut names);
            if line.ends_with(']') {
                in_array = false;
            }
            continue;
        }

        if line.starts_with('[') {
            section = line.trim_matches(|c| c == '[' || c == ']').to_string();
            continue;
        }

        if section.ends_with("dependencies") {
            if let Some((key, _)) = line.split_once('=') {
                names.push(key.trim().trim_matches('"').to_string());
            }
        } else if section == "project" {
            if let Some(rest) = line.strip_prefix("dependencies") {
                if let Some(array) = rest.trim_start().strip_prefix('=') {
                    collect_quoted_requirements(array, &mut names);
                    in_array = !array.trim_end().ends_with(']');
                }
            }
        }
    }

    names
}

fn collect_quoted_requirements(fragment: &str, names: &mut Vec<String>) {
    for (i, part) in fragment.split('"').enumerate() {
        // odd indices are inside quotes
        if i % 2 == 1 {
            let name = requirement_name(part);
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
}

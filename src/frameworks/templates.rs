//! Embedded Dockerfile and `.dockerignore` templates.

use anyhow::{Context, Result};
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

pub const NEXTJS_DEFAULT: &str = "nextjs-default.tera";
pub const NEXTJS_STANDALONE: &str = "nextjs-standalone.tera";
pub const STATIC_SITE: &str = "static-site.tera";
pub const NODE_SERVER: &str = "node-server.tera";
pub const PYTHON_APP: &str = "python-app.tera";

pub struct DockerfileRenderer {
    tera: Tera,
}

impl DockerfileRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();

        tera.add_raw_template(NEXTJS_DEFAULT, NEXTJS_DEFAULT_TEMPLATE)
            .context("Failed to add Next.js template")?;
        tera.add_raw_template(NEXTJS_STANDALONE, NEXTJS_STANDALONE_TEMPLATE)
            .context("Failed to add Next.js standalone template")?;
        tera.add_raw_template(STATIC_SITE, STATIC_SITE_TEMPLATE)
            .context("Failed to add static site template")?;
        tera.add_raw_template(NODE_SERVER, NODE_SERVER_TEMPLATE)
            .context("Failed to add Node server template")?;
        tera.add_raw_template(PYTHON_APP, PYTHON_APP_TEMPLATE)
            .context("Failed to add Python template")?;

        Ok(Self { tera })
    }

    pub fn render<T: Serialize>(&self, template: &str, values: &T) -> Result<String> {
        let context = TeraContext::from_serialize(values)
            .with_context(|| format!("Failed to build context for {}", template))?;
        self.tera
            .render(template, &context)
            .with_context(|| format!("Failed to render {}", template))
    }
}

const NEXTJS_DEFAULT_TEMPLATE: &str = r#"FROM node:{{ runtime_version }}-alpine AS builder
WORKDIR /app
{% if package_manager != "npm" %}RUN corepack enable
{% endif %}COPY . .
RUN {{ install_command }}
RUN {{ build_command }}

FROM node:{{ runtime_version }}-alpine
WORKDIR /app
ENV NODE_ENV=production PORT={{ port }}
{% if package_manager != "npm" %}RUN corepack enable
{% endif %}COPY --from=builder /app ./
EXPOSE {{ port }}
CMD {{ run_command }}
"#;

const NEXTJS_STANDALONE_TEMPLATE: &str = r#"FROM node:{{ runtime_version }}-alpine AS builder
WORKDIR /app
{% if package_manager != "npm" %}RUN corepack enable
{% endif %}COPY . .
RUN {{ install_command }}
RUN {{ build_command }}
RUN mkdir -p public

FROM node:{{ runtime_version }}-alpine
WORKDIR /app
ENV NODE_ENV=production PORT={{ port }} HOSTNAME=0.0.0.0
COPY --from=builder /app/{{ output_directory }}/standalone ./
COPY --from=builder /app/{{ output_directory }}/static ./{{ output_directory }}/static
COPY --from=builder /app/public ./public
EXPOSE {{ port }}
CMD {{ run_command }}
"#;

const STATIC_SITE_TEMPLATE: &str = r#"FROM node:{{ runtime_version }}-alpine AS builder
WORKDIR /app
{% if package_manager != "npm" %}RUN corepack enable
{% endif %}COPY . .
RUN {{ install_command }}
RUN {{ build_command }}

FROM nginx:alpine
RUN printf 'server {\n  listen {{ port }};\n  root /usr/share/nginx/html;\n  location / {\n    try_files $uri $uri/ /index.html;\n  }\n}\n' > /etc/nginx/conf.d/default.conf
COPY --from=builder /app/{{ output_directory }} /usr/share/nginx/html
EXPOSE {{ port }}
CMD ["nginx", "-g", "daemon off;"]
"#;

const NODE_SERVER_TEMPLATE: &str = r#"FROM node:{{ runtime_version }}-alpine
WORKDIR /app
ENV NODE_ENV=production PORT={{ port }}
{% if package_manager != "npm" %}RUN corepack enable
{% endif %}COPY . .
RUN {{ install_command }}
{% if build_command %}RUN {{ build_command }}
{% endif %}EXPOSE {{ port }}
CMD {{ run_command }}
"#;

const PYTHON_APP_TEMPLATE: &str = r#"FROM python:{{ runtime_version }}-slim
WORKDIR /app
ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1 PORT={{ port }}
COPY . .
RUN {{ install_command }}
{% if build_command %}RUN {{ build_command }}
{% endif %}EXPOSE {{ port }}
CMD {{ run_command }}
"#;

pub const NODE_DOCKERIGNORE: &str = "node_modules
.next
dist
build
out
.git
npm-debug.log*
yarn-error.log*
.env*.local
";

pub const PYTHON_DOCKERIGNORE: &str = "__pycache__
*.pyc
.venv
venv
.git
.pytest_cache
.env
";

pub const GENERIC_DOCKERIGNORE: &str = ".git
";

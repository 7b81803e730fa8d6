//! Script loaders (`js`, `ts-loader`, `babel-loader`).

use crate::bundler::loader::{text, Loader, LoaderContext, LoaderError, LoaderOutput};
use crate::bundler::lower::lower_module;
use crate::bundler::scan::scan_imports;
use serde_json::Value;

/// Lowers module syntax to the runtime's CommonJS shape and reports every
/// `require`/`import()` in the result. Type annotations are left as written.
pub struct ScriptLoader {
    id: &'static str,
}

impl ScriptLoader {
    #[must_use]
    pub const fn new(id: &'static str) -> Self {
        Self { id }
    }
}

impl Loader for ScriptLoader {
    fn id(&self) -> &str {
        self.id
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let code = lower_module(&text(&content));
        let imports = scan_imports(&code);
        Ok(LoaderOutput::code(code).with_imports(imports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::ModuleKey;
    use crate::bundler::loader::{ImportKind, ImportRequest};
    use std::path::{Path, PathBuf};

    #[test]
    fn test_lowers_and_discovers() {
        let key = ModuleKey::file(PathBuf::from("/app/src/adb.ts"));
        let ctx = LoaderContext {
            key: &key,
            virtual_part: None,
            context: Path::new("/app"),
            public_path: "/dist/",
        };
        let source = b"import Vue from 'vue';\nimport App from './App.vue';\nconst later = () => import('./later');\nexport default new Vue(App);\n";
        let out = ScriptLoader::new("ts-loader")
            .run(source.to_vec(), &Value::Null, &ctx)
            .unwrap();

        let code = text(&out.content).into_owned();
        assert!(code.contains("require.interopDefault(require(\"vue\"))"));
        assert!(code.contains("exports.default = new Vue(App);"));
        assert_eq!(
            out.imports,
            vec![
                ImportRequest::new("vue", ImportKind::Static),
                ImportRequest::new("./App.vue", ImportKind::Static),
                ImportRequest::new("./later", ImportKind::Dynamic),
            ]
        );
    }
}

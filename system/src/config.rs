use crate::path::StorePath;
use crate::types::{BufferKey, Language};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CPP_TEMPLATE: &str = "#include <bits/stdc++.h>
using namespace std;

int main() {
\t
}
";

pub const JAVA_TEMPLATE: &str = "import java.io.*;
import java.util.*;

public class Main {
\tpublic static void main(String[] args) throws IOException {
\t\tBufferedReader r = new BufferedReader(new InputStreamReader(System.in));
\t\tPrintWriter pw = new PrintWriter(System.out);

\t\tpw.close();
\t}
}
";

pub const PY_TEMPLATE: &str = "import sys
input = sys.stdin.readline

";

pub const CPP_COMPILER_OPTIONS: &str =
    "-std=c++17 -O2 -Wall -Wextra -Wshadow -Wconversion -Wfloat-equal -Wduplicated-cond -Wlogical-op";

/// Per session knobs. Everything has a default so a partial file deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Language a freshly claimed workspace starts with.
    pub default_language: Language,
    pub compiler_options: BTreeMap<Language, String>,
    /// Boilerplate seeded into brand new buffers. Missing keys seed nothing.
    pub templates: BTreeMap<BufferKey, String>,
    /// Extra roster the session shows up in, e.g. `classrooms/<id>/presence`.
    pub secondary_roster: Option<StorePath>,
    pub max_presence_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut compiler_options = BTreeMap::new();
        compiler_options.insert(Language::Cpp, CPP_COMPILER_OPTIONS.to_owned());
        compiler_options.insert(Language::Java, String::new());
        compiler_options.insert(Language::Py, String::new());

        let mut templates = BTreeMap::new();
        templates.insert(BufferKey::Code(Language::Cpp), CPP_TEMPLATE.to_owned());
        templates.insert(BufferKey::Code(Language::Java), JAVA_TEMPLATE.to_owned());
        templates.insert(BufferKey::Code(Language::Py), PY_TEMPLATE.to_owned());

        Self {
            default_language: Language::Cpp,
            compiler_options,
            templates,
            secondary_roster: None,
            max_presence_failures: 3,
        }
    }
}

impl SessionConfig {
    pub fn default_content(&self, key: &BufferKey) -> &str {
        self.templates.get(key).map(|s| s.as_str()).unwrap_or("")
    }
}

//! Shared fixtures: a fake project root with `sh` engines and throwaway repos.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use pm_coach::harness::EngineSpec;
use tempfile::TempDir;

/// Prints every `.py` file under `.` behind a marker line, sorted by path.
/// In artifact mode writes the instruction file and a `CONTEXT.txt` file list.
pub const SERIALIZER: &str = r#"#!/bin/sh
if [ "$2" = "--init-prompt" ]; then
  if [ "$4" = "gemini" ]; then out=GEMINI_INSTRUCTIONS.txt; else out=CLAUDE.md; fi
  printf '# Instructions\n' > "$out"
  find . -type f -name '*.py' | sort > CONTEXT.txt
  exit 0
fi
for f in $(find . -type f -name '*.py' | sort); do
  printf '++++++++++ %s ++++++++++\n' "${f#./}"
  cat "$f"
done
"#;

/// Like [`SERIALIZER`] but silently drops files whose name starts with `skip_`,
/// and writes its instruction file without a trailing newline.
pub const LOSSY_SERIALIZER: &str = r#"#!/bin/sh
if [ "$2" = "--init-prompt" ]; then
  if [ "$4" = "gemini" ]; then out=GEMINI_INSTRUCTIONS.txt; else out=CLAUDE.md; fi
  printf '# Instructions' > "$out"
  find . -type f -name '*.py' | sort > CONTEXT.txt
  exit 0
fi
for f in $(find . -type f -name '*.py' | sort); do
  case "${f##*/}" in skip_*) continue ;; esac
  printf '++++++++++ %s ++++++++++\n' "${f#./}"
  cat "$f"
done
"#;

pub const CRASHER: &str = "#!/bin/sh\necho 'panicked at src/main.rs' >&2\nexit 101\n";

/// Project root holding `pm_encoder.py` and engine scripts, plus a directory
/// of target repos.
pub struct Fixture {
    pub root: TempDir,
    pub repos: TempDir,
}

impl Fixture {
    pub fn new(reference: &str, candidate: &str) -> Self {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("pm_encoder.py"), "# marker\n").unwrap();
        fs::write(root.path().join("reference.sh"), reference).unwrap();
        fs::write(root.path().join("candidate.sh"), candidate).unwrap();
        Self {
            root,
            repos: TempDir::new().unwrap(),
        }
    }

    pub fn reference(&self) -> EngineSpec {
        sh_engine("python", "reference.sh")
    }

    pub fn candidate(&self) -> EngineSpec {
        sh_engine("rust", "candidate.sh")
    }

    /// Create a repo with `(relative path, content)` files.
    pub fn repo(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.repos.path().join(name);
        for (path, content) in files {
            let file = dir.join(path);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write a target list naming `repos`, one per line.
    pub fn target_list(&self, repos: &[&Path]) -> PathBuf {
        let list = self.repos.path().join("targets.txt");
        let mut content = String::from("# generated\n");
        for repo in repos {
            content.push_str(&format!("{}\n", repo.display()));
        }
        fs::write(&list, content).unwrap();
        list
    }

    /// CLI flags selecting the fixture's engines and root.
    pub fn engine_args(&self) -> Vec<String> {
        vec![
            "--project-root".to_string(),
            self.root.path().display().to_string(),
            "--reference-launcher".to_string(),
            "sh".to_string(),
            "--reference-entry".to_string(),
            "reference.sh".to_string(),
            "--candidate-launcher".to_string(),
            "sh".to_string(),
            "--candidate-entry".to_string(),
            "candidate.sh".to_string(),
        ]
    }
}

fn sh_engine(label: &str, script: &str) -> EngineSpec {
    EngineSpec {
        label: label.to_string(),
        launcher: Some("sh".to_string()),
        launcher_args: Vec::new(),
        entry: PathBuf::from(script),
    }
}

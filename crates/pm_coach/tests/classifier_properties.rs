#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeSet;

use pm_coach::harness::{
    Capture, FailureType, FileChange, MAX_DIFF_LINES, Mode, OutputClassifier, TargetOutcome,
    TestVector,
};
use pm_coach::source::RepoMetadata;
use proptest::prelude::*;

fn render(files: &BTreeSet<String>) -> String {
    files
        .iter()
        .map(|f| format!("++++++++++ {f} ++++++++++\ncontents of {f}\n"))
        .collect()
}

fn lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z ]{0,12}", 0..30)
}

// =============================================================================
// Priority order
// =============================================================================

proptest! {
    #[test]
    fn identical_output_always_matches(out in ".{0,400}") {
        let c = OutputClassifier::default().classify(&Capture::success(out.clone()), &Capture::success(out));
        prop_assert_eq!(c.failure_type, FailureType::None);
        prop_assert!(c.diff_lines.is_empty());
    }

    #[test]
    fn reordered_lines_are_checksum_mismatch(
        (original, shuffled) in prop::collection::vec("[a-z ]{1,12}", 2..30)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        prop_assume!(original != shuffled);
        let a = original.join("\n");
        let b = shuffled.join("\n");
        let c = OutputClassifier::default().classify(&Capture::success(a), &Capture::success(b));
        prop_assert_eq!(c.failure_type, FailureType::ChecksumMismatch);
    }

    #[test]
    fn nonzero_exit_dominates_content(
        code in 1i32..255,
        out in "[a-z\n]{0,50}",
        crash_a in any::<bool>(),
    ) {
        let ok = Capture::success(out.clone());
        let crashed = Capture { stdout: out, ..Capture::failure(code, "boom") };
        let classifier = OutputClassifier::default();
        if crash_a {
            prop_assert_eq!(classifier.classify(&crashed, &ok).failure_type, FailureType::CrashA);
        } else {
            prop_assert_eq!(classifier.classify(&ok, &crashed).failure_type, FailureType::CrashB);
        }
        prop_assert_eq!(classifier.classify(&crashed, &crashed).failure_type, FailureType::BothCrash);
    }

    #[test]
    fn strict_subset_is_missing_file(
        files in prop::collection::btree_set("[a-z]{1,6}/[a-z]{1,6}\\.py", 2..8),
        keep in 1usize..7,
    ) {
        let keep = keep.min(files.len() - 1);
        let kept: BTreeSet<String> = files.iter().take(keep).cloned().collect();
        let missing: BTreeSet<String> = files.difference(&kept).cloned().collect();

        let c = OutputClassifier::default()
            .classify(&Capture::success(render(&files)), &Capture::success(render(&kept)));
        prop_assert_eq!(c.failure_type, FailureType::MissingFile);
        let reported: BTreeSet<String> = c.file_diff.keys().cloned().collect();
        prop_assert_eq!(&reported, &missing);
        prop_assert!(c.file_diff.values().all(|v| *v == FileChange::Missing));
    }

    #[test]
    fn strict_superset_is_extra_file(
        files in prop::collection::btree_set("[a-z]{1,8}\\.rs", 2..8),
    ) {
        let fewer: BTreeSet<String> = files.iter().skip(1).cloned().collect();
        let c = OutputClassifier::default()
            .classify(&Capture::success(render(&fewer)), &Capture::success(render(&files)));
        prop_assert_eq!(c.failure_type, FailureType::ExtraFile);
        prop_assert_eq!(c.file_diff.len(), 1);
    }

    #[test]
    fn diff_is_always_bounded(a in lines(), b in lines()) {
        let c = OutputClassifier::default()
            .classify(&Capture::success(a.join("\n")), &Capture::success(b.join("\n")));
        prop_assert!(c.diff_lines.len() <= MAX_DIFF_LINES);
    }

    #[test]
    fn vector_exists_exactly_for_mismatches(a in lines(), b in lines()) {
        let run = OutputClassifier::default().classify_run(
            &RepoMetadata::new("prop"),
            Capture::success(a.join("\n")),
            Capture::success(b.join("\n")),
        );
        let matched = run.matched();
        prop_assert_eq!(matched, run.failure_type == FailureType::None);

        let outcome = TargetOutcome::Differential(run);
        let vector = TestVector::from_outcome(&outcome, &Mode::Serialize);
        prop_assert_eq!(vector.is_some(), !matched);
        if let Some(vector) = vector {
            prop_assert_eq!(vector.to_json().unwrap(), vector.to_json().unwrap());
        }
    }
}

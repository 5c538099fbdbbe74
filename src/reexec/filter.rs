//! Child command lines that select exactly one test.

/// How the child test binary is told which single test to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStyle {
    /// Standard libtest: `<name> --exact`. Libtest filters are plain strings, `--exact` anchors them.
    #[default]
    Libtest,
    /// A runner that filters by regular expression, e.g. `--run=^name$` for `Pattern { flag: "--run" }`.
    Pattern { flag: &'static str },
}

/// Libtest flags every child needs on top of the name filter.
///
/// `--nocapture` because the child exits before libtest can replay captured output, `--include-ignored` so an
/// `#[ignore]` test can still re-run itself, and one thread because only one test is selected anyway.
const LIBTEST_CHILD_FLAGS: [&str; 3] = ["--nocapture", "--include-ignored", "--test-threads=1"];

/// Anchored regular expression matching `name` and nothing else.
pub fn anchored_pattern(name: &str) -> String {
    format!("^{}$", regex::escape(name))
}

impl FilterStyle {
    /// Arguments that restrict the child to `test`, before any configured harness args.
    pub fn filter_args(&self, test: &str) -> Vec<String> {
        match self {
            FilterStyle::Libtest => {
                let mut args = vec![test.to_string(), "--exact".to_string()];
                args.extend(LIBTEST_CHILD_FLAGS.iter().map(|flag| flag.to_string()));
                args
            }
            FilterStyle::Pattern { flag } => vec![format!("{flag}={}", anchored_pattern(test))],
        }
    }

    /// Whether caller arguments may follow the filter on the command line.
    ///
    /// Libtest would treat them as additional name filters, so they only travel through the environment there.
    pub fn passes_args_on_command_line(&self) -> bool {
        matches!(self, FilterStyle::Pattern { .. })
    }

    /// Whether `output` opens with libtest's header for a run that selected no test at all.
    pub(crate) fn ran_nothing(&self, output: &str) -> bool {
        match self {
            FilterStyle::Libtest => output.starts_with("\nrunning 0 tests"),
            FilterStyle::Pattern { .. } => false,
        }
    }
}

//! Reproducible analysis script.
//!
//! Emits a standalone Python script (pandas, scipy, statsmodels) that
//! recomputes the reported statistics from the original data file under the
//! same plan, for independent verification.

use crate::models::AnalysisPlan;
use serde_json::Value;

const SCRIPT_TEMPLATE: &str = r#"#!/usr/bin/env python3
"""Reproducible analysis generated by trialscope.

Usage: python analysis.py <data file>
"""
import math
import sys

import numpy as np
import pandas as pd
import statsmodels.api as sm
from scipy import stats

TREATMENT_COLUMN = @TREATMENT_COLUMN@
TREATMENT_VALUE = @TREATMENT_VALUE@
CONTROL_VALUE = @CONTROL_VALUE@
OUTCOME_COLUMN = @OUTCOME_COLUMN@
COVARIATES = @COVARIATES@
ALPHA = 0.05


def load(path):
    lower = path.lower()
    if lower.endswith((".parquet", ".pq")):
        return pd.read_parquet(path)
    if lower.endswith((".xlsx", ".xls", ".xlsm", ".ods")):
        return pd.read_excel(path)
    if lower.endswith((".jsonl", ".ndjson")):
        return pd.read_json(path, lines=True)
    if lower.endswith(".json"):
        return pd.read_json(path)
    return pd.read_csv(path, sep=None, engine="python")


def label(value):
    """Canonical arm label: 1, 1.0 and "1" are the same arm."""
    if value is None or (isinstance(value, float) and math.isnan(value)):
        return None
    if isinstance(value, (bool, np.bool_)):
        return str(bool(value)).lower()
    text = str(value).strip()
    if text.lower() in ("true", "false"):
        return text.lower()
    try:
        number = float(text)
    except ValueError:
        return text
    if math.isfinite(number) and number == int(number):
        return str(int(number))
    return repr(number)


def main():
    if len(sys.argv) != 2:
        sys.exit(__doc__)
    data = load(sys.argv[1])
    n_total = len(data)

    data["_arm"] = data[TREATMENT_COLUMN].map(label)
    # Balance uses every row with a known arm, even when its outcome is missing.
    assigned = data[data["_arm"].isin([TREATMENT_VALUE, CONTROL_VALUE])].copy()
    assigned["_treated"] = (assigned["_arm"] == TREATMENT_VALUE).astype(int)
    assigned[OUTCOME_COLUMN] = pd.to_numeric(assigned[OUTCOME_COLUMN], errors="coerce")
    data = assigned.dropna(subset=[OUTCOME_COLUMN])

    treated = data.loc[data["_treated"] == 1, OUTCOME_COLUMN]
    control = data.loc[data["_treated"] == 0, OUTCOME_COLUMN]
    n1, n0 = len(treated), len(control)
    print(f"rows: {n_total}, treatment: {n1}, control: {n0}")

    ate = treated.mean() - control.mean()
    v1, v0 = treated.var(ddof=1), control.var(ddof=1)
    se = math.sqrt(v1 / n1 + v0 / n0)
    print(f"ATE: {ate:.4f}  SE: {se:.4f}")

    if se > 0:
        dof = (v1 / n1 + v0 / n0) ** 2 / (
            (v1 / n1) ** 2 / (n1 - 1) + (v0 / n0) ** 2 / (n0 - 1)
        )
        critical = stats.t.ppf(0.975, dof) if min(n1, n0) < 30 else 1.96
        print(f"95% CI: [{ate - critical * se:.4f}, {ate + critical * se:.4f}]")
        welch = stats.ttest_ind(treated, control, equal_var=False)
        print(f"Welch t: {welch.statistic:.4f}  df: {dof:.4f}  p: {welch.pvalue:.6g}")
        print(f"significant: {welch.pvalue < ALPHA}")
    else:
        print("zero variance: CI and t-test undefined")

    mw = stats.mannwhitneyu(treated, control, alternative="two-sided", method="asymptotic")
    print(f"Mann-Whitney U: {mw.statistic:.4f}  p: {mw.pvalue:.6g}")

    pooled = math.sqrt(((n1 - 1) * v1 + (n0 - 1) * v0) / (n1 + n0 - 2))
    if pooled > 0:
        print(f"Cohen's d: {ate / pooled:.4f}")
    else:
        print("Cohen's d: effect size undefined due to zero variance")

    simple = sm.OLS(data[OUTCOME_COLUMN], sm.add_constant(data[["_treated"]])).fit()
    print("\nSimple regression")
    print(simple.params.to_string())

    if COVARIATES:
        frame = data[[OUTCOME_COLUMN, "_treated"] + COVARIATES].dropna()
        numeric = [c for c in COVARIATES if pd.api.types.is_numeric_dtype(frame[c])]
        categorical = [c for c in COVARIATES if c not in numeric]
        design = frame[["_treated"] + numeric].astype(float)
        for column in categorical:
            dummies = pd.get_dummies(frame[column].astype(str), prefix=column, drop_first=True)
            design = design.join(dummies.astype(float))
        design = sm.add_constant(design)
        if np.linalg.matrix_rank(design.values) < design.shape[1] or len(design) <= design.shape[1]:
            print("\nMultiple regression omitted: rank deficient design")
        else:
            multiple = sm.OLS(frame[OUTCOME_COLUMN], design).fit()
            print("\nMultiple regression")
            print(multiple.params.to_string())

        print("\nCovariate balance")
        for column in COVARIATES:
            values = pd.to_numeric(assigned[column], errors="coerce")
            if not pd.api.types.is_numeric_dtype(assigned[column]):
                print(f"{column}: not tested (non-numeric)")
                continue
            a = values[assigned["_treated"] == 1].dropna()
            b = values[assigned["_treated"] == 0].dropna()
            if len(a) < 2 or len(b) < 2:
                print(f"{column}: not tested (fewer than 2 observed values in an arm)")
                continue
            result = stats.ttest_ind(a, b, equal_var=False)
            status = "balanced" if result.pvalue > ALPHA else "imbalanced"
            print(f"{column}: diff {a.mean() - b.mean():.4f}  p {result.pvalue:.6g}  {status}")


if __name__ == "__main__":
    main()
"#;

/// Render the analysis script for `plan`.
pub fn generate_python_script(plan: &AnalysisPlan) -> String {
    let covariates = Value::Array(
        plan.covariate_columns
            .iter()
            .map(|c| Value::String(c.clone()))
            .collect(),
    );

    SCRIPT_TEMPLATE
        .replace("@TREATMENT_COLUMN@", &py_string(&plan.treatment_column))
        .replace("@TREATMENT_VALUE@", &py_string(&plan.treatment_value))
        .replace("@CONTROL_VALUE@", &py_string(&plan.control_value))
        .replace("@OUTCOME_COLUMN@", &py_string(&plan.outcome_column))
        .replace("@COVARIATES@", &covariates.to_string())
}

/// JSON string literals are valid Python string literals.
fn py_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::fixtures::arm_plan;

    #[test]
    fn test_plan_values_embedded() {
        let script = generate_python_script(&arm_plan("B", "A", &["age", "region"]));
        assert!(script.contains("TREATMENT_COLUMN = \"arm\""));
        assert!(script.contains("TREATMENT_VALUE = \"B\""));
        assert!(script.contains("CONTROL_VALUE = \"A\""));
        assert!(script.contains("OUTCOME_COLUMN = \"outcome\""));
        assert!(script.contains("COVARIATES = [\"age\",\"region\"]"));
        assert!(!script.contains('@'));
    }

    #[test]
    fn test_names_are_escaped() {
        let mut plan = arm_plan("1", "0", &[]);
        plan.outcome_column = "score \"final\"".to_string();
        let script = generate_python_script(&plan);
        assert!(script.contains(r#"OUTCOME_COLUMN = "score \"final\"""#));
        assert!(script.contains("COVARIATES = []"));
    }

    #[test]
    fn test_script_is_self_contained() {
        let script = generate_python_script(&arm_plan("1", "0", &[]));
        assert!(script.starts_with("#!/usr/bin/env python3"));
        assert!(script.contains("import pandas as pd"));
        assert!(script.contains("def main():"));
        assert!(script.contains("if __name__ == \"__main__\":"));
    }

    #[test]
    fn test_balance_runs_before_outcome_dropna() {
        let script = generate_python_script(&arm_plan("1", "0", &["age"]));
        let dropna = script.find("data = assigned.dropna(subset=[OUTCOME_COLUMN])").unwrap();
        let balance = script.find("values = pd.to_numeric(assigned[column]").unwrap();
        assert!(dropna < balance);
        assert!(script.contains("a = values[assigned[\"_treated\"] == 1].dropna()"));
        assert!(!script.contains("values[data[\"_treated\"] == 1]"));
    }
}

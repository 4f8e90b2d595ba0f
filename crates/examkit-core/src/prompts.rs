//! Instructions handed to the agent in each phase.

use crate::exam::{ExamRecord, Topic};

pub const QUESTION_FILE: &str = "question.md";
pub const RUBRIC_FILE: &str = "rubric.md";

/// Phase 1: implement the full solution and author the exam artifacts.
pub fn solution_instruction(topic: &Topic, library_subpath: &str) -> String {
    format!(
        "You are an expert Rust developer and exam creator.\n\
         Your task: create a coding exam on the topic '{title}'.\n\
         Description: {description}\n\n\
         Instructions:\n\
         1. Explore the codebase to understand the context.\n\
         2. Add a feature or fix a bug related to the topic.\n\
         3. Write `{QUESTION_FILE}` describing the problem clearly to a student.\n\
         4. Write `{RUBRIC_FILE}` with evaluation criteria.\n\
         5. Implement the FULL solution.\n\
         6. Add a test file (e.g. `tests/exam_test.rs`) that verifies the solution. \
         The tests MUST PASS with your solution.\n\n\
         The library code is available in `{library_subpath}`. Your solution MUST use it \
         (e.g. as a path dependency in Cargo.toml). Read it freely but DO NOT modify \
         anything under `{library_subpath}`.",
        title = topic.title,
        description = topic.description,
    )
}

/// Phase 2: strip the solution back to a problem state.
pub fn problem_instruction() -> String {
    format!(
        "Now prepare the problem state for the student.\n\
         Your task: revert the solution code to a starting state.\n\n\
         Instructions:\n\
         1. Remove the implementation of the feature or fix you just created, leaving \
         only signatures and type definitions (stubs).\n\
         2. Keep the test file (`tests/exam_test.rs`); it must compile but fail \
         (failing asserts or `todo!()`).\n\
         3. DO NOT modify `{QUESTION_FILE}` or `{RUBRIC_FILE}`.\n\
         4. Remove any temporary files you created."
    )
}

pub fn solve_instruction(exam: &ExamRecord) -> String {
    format!(
        "You are taking a coding exam.\n\n\
         Question:\n{question}\n\n\
         Solve the problem by editing the files in the current directory.\n\
         Your solution must pass all provided tests (`cargo test`).\n",
        question = exam.question,
    )
}

pub fn evaluate_instruction(exam: &ExamRecord) -> String {
    format!(
        "You are a strict exam grader.\n\n\
         Your task: evaluate the student's solution in the current directory against the rubric.\n\n\
         Question:\n{question}\n\n\
         Rubric:\n{rubric}\n\n\
         Instructions:\n\
         1. Run the tests (`cargo test`) to check correctness.\n\
         2. Inspect the code for the specific requirements, code style and signs of cheating.\n\
         3. Write a detailed report with the points awarded for each rubric item.\n\
         4. End with a line of the form 'TOTAL USER SCORE: <score>/<total>'.\n",
        question = exam.question,
        rubric = exam.rubric,
    )
}

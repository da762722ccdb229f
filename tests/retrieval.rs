use std::{collections::HashSet, sync::Arc};

use proptest::prelude::*;
use qabot::{
    Error,
    HashingEmbedder,
    RetrievalEngine,
    TrainingExample,
    engine::NO_RELEVANT_ANSWER,
    text_util,
};

fn engine() -> RetrievalEngine {
    // Wide enough that hash collisions between distinct questions are
    // negligible.
    RetrievalEngine::new(Arc::new(HashingEmbedder::new(4096).unwrap()))
}

/// Examples whose questions have at least three words and are pairwise
/// distinct after tokenization.
fn distinct_examples() -> impl Strategy<Value = Vec<TrainingExample>> {
    prop::collection::vec(
        (
            prop::collection::vec("[a-z]{2,8}", 3..6),
            "[A-Za-z0-9 ]{1,20}",
        ),
        1..12,
    )
    .prop_map(|raw| {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter_map(|(words, answer)| {
                let question = words.join(" ");
                seen.insert(text_util::tokenize(&question))
                    .then(|| TrainingExample::new(question, answer))
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn trained_question_returns_its_own_answer(
        examples in distinct_examples(),
        k in 1usize..5,
    ) {
        let engine = engine();
        prop_assert_eq!(engine.train(&examples).unwrap(), examples.len());

        for example in &examples {
            let answer = engine.respond(&example.question, k).unwrap();
            prop_assert_eq!(&answer, &example.answer);
        }
    }

    #[test]
    fn any_query_gets_a_stored_answer(
        examples in distinct_examples(),
        query in "[ -~]{0,40}",
    ) {
        let engine = engine();
        engine.train(&examples).unwrap();

        let answer = engine.respond(&query, 1).unwrap();
        prop_assert!(examples.iter().any(|ex| ex.answer == answer));
    }
}

#[test]
fn respond_before_train_fails() {
    let engine = engine();
    assert!(matches!(
        engine.respond("What is 2+2?", 1),
        Err(Error::NotTrained(_))
    ));
}

#[test]
fn concrete_scenario() {
    let engine = engine();
    let examples = vec![
        TrainingExample::new("What is 2+2?", "4"),
        TrainingExample::new("Capital of France?", "Paris"),
    ];

    assert_eq!(engine.train(&examples).unwrap(), 2);
    assert_eq!(engine.respond("What is 2+2?", 1).unwrap(), "4");

    let answer = engine.respond("Unrelated nonsense query", 1).unwrap();
    assert!(answer == "4" || answer == "Paris");
    assert_ne!(answer, NO_RELEVANT_ANSWER);
}

#[test]
fn near_duplicate_phrasing_finds_the_right_answer() {
    let engine = engine();
    engine
        .train(&[
            TrainingExample::new("How do I reset my password?", "Use the reset link"),
            TrainingExample::new("Where is the office located?", "Lisbon"),
            TrainingExample::new("What are the opening hours?", "9 to 5"),
        ])
        .unwrap();

    assert_eq!(
        engine.respond("how can I reset the password", 1).unwrap(),
        "Use the reset link"
    );
    assert_eq!(
        engine.respond("office location?", 1).unwrap(),
        "Lisbon"
    );
}

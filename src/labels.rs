//! Turning raw model scores into ranked, labelled classifications.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

pub const DEFAULT_TOP_K: usize = 5;

/// A single ranked classification candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub class_name: String,
    pub label: String,
    pub description: String,
    /// The score reported by the model for this class.
    pub confidence: f64,
    /// This class's share of the softmax over every class.
    pub probability: f64,
}

impl ClassificationResult {
    pub fn new(class_name: &str, confidence: f64, probability: f64) -> Self {
        Self {
            class_name: class_name.to_string(),
            label: display_label(class_name),
            description: class_description(class_name),
            confidence,
            probability,
        }
    }
}

/// Numerically stable softmax: the maximum logit is subtracted first.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let Some(max) = logits.iter().copied().map(f64::from).reduce(f64::max) else {
        return Vec::new();
    };
    let exps: Vec<f64> = logits.iter().map(|&v| (f64::from(v) - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Converts raw scores into the `top_k` most probable classes.
///
/// The result is ordered by probability, highest first; ties keep the class
/// order of `class_names`. A `top_k` of zero is treated as one.
pub fn postprocess(
    raw_scores: &[f32],
    class_names: &[String],
    top_k: usize,
) -> Result<Vec<ClassificationResult>> {
    if raw_scores.len() != class_names.len() {
        return Err(ClassifierError::Inference(format!(
            "predictions length ({}) does not match class names length ({})",
            raw_scores.len(),
            class_names.len()
        )));
    }
    if raw_scores.is_empty() {
        return Err(ClassifierError::Inference("model produced no scores".to_string()));
    }
    if raw_scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifierError::Inference("model produced non-finite scores".to_string()));
    }

    let probabilities = softmax(raw_scores);

    Ok(class_names
        .iter()
        .zip(raw_scores)
        .zip(probabilities)
        .map(|((name, &score), prob)| ClassificationResult::new(name, f64::from(score), prob))
        .sorted_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .take(top_k.max(1))
        .collect())
}

/// Human readable label for a class name.
pub fn display_label(class_name: &str) -> String {
    class_name.replace('_', " ")
}

#[rustfmt::skip]
const DESCRIPTIONS: &[(&str, &str)] = &[
    ("cat", "A small domestic feline mammal"),
    ("dog", "A domestic canine companion animal"),
    ("bird", "A feathered, winged, bipedal animal"),
    ("car", "A four-wheeled motor vehicle"),
    ("truck", "A large motor vehicle for transporting goods"),
    ("airplane", "A powered flying vehicle with wings"),
    ("boat", "A watercraft designed for travel on water"),
    ("train", "A connected series of railway cars"),
    ("bicycle", "A two-wheeled vehicle powered by pedaling"),
    ("motorcycle", "A two-wheeled motor vehicle"),
    ("person", "A human being"),
    ("horse", "A large domesticated ungulate mammal"),
    ("sheep", "A woolly ruminant mammal"),
    ("cow", "A large domesticated bovine animal"),
    ("elephant", "A large mammal with a trunk"),
    ("bear", "A large omnivorous mammal"),
    ("zebra", "A black and white striped equine"),
    ("giraffe", "A tall African mammal with a long neck"),
    ("tench", "A European freshwater fish"),
    ("goldfish", "A small golden-colored fish"),
    ("great_white_shark", "A large predatory shark"),
    ("tiger_shark", "A large shark with distinctive markings"),
    ("hammerhead", "A shark with a flattened head"),
    ("electric_ray", "A cartilaginous fish that can produce electric discharge"),
    ("stingray", "A cartilaginous fish with a long tail"),
    ("cock", "A male domestic fowl"),
    ("hen", "A female domestic fowl"),
    ("ostrich", "A large flightless bird"),
];

/// Description for a class, with a generic fallback for unknown names.
pub fn class_description(class_name: &str) -> String {
    DESCRIPTIONS
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(_, desc)| desc.to_string())
        .unwrap_or_else(|| format!("A {} object or entity", display_label(class_name)))
}

#[rustfmt::skip]
const DEFAULT_CLASSES: [&str; 53] = [
    "cat", "dog", "bird", "car", "truck", "airplane", "boat", "train",
    "bicycle", "motorcycle", "person", "horse", "sheep", "cow", "elephant",
    "bear", "zebra", "giraffe", "backpack", "umbrella", "handbag", "tie",
    "suitcase", "frisbee", "skis", "snowboard", "sports_ball", "kite",
    "baseball_bat", "baseball_glove", "skateboard", "surfboard", "tennis_racket",
    "bottle", "wine_glass", "cup", "fork", "knife", "spoon", "bowl",
    "banana", "apple", "sandwich", "orange", "broccoli", "carrot",
    "hot_dog", "pizza", "donut", "cake", "chair", "couch", "potted_plant",
];

/// The built-in generic class list used when a model ships no metadata.
pub fn default_classes() -> Vec<String> {
    DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect()
}

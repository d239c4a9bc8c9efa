//! Response classification from population percentages.

pub mod classifier;
pub mod forest;

pub use classifier::{
    cross_validate, decode_class, encode_response, subject_profiles, CrossValidation, Prediction,
    ResponseClassifier, SubjectProfile, CLASS_NO, CLASS_YES,
};
pub use forest::{DecisionTree, ForestConfig, RandomForest};

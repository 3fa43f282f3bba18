use crate::emotion::{DominantEmotion, Emotion, ExpressionScores};

/// Picks the label with the highest probability. Ties resolve to the first
/// label in the fixed enumeration order (stable fold, strict comparison),
/// so the result is deterministic for equal scores.
pub fn dominant(scores: &ExpressionScores) -> DominantEmotion {
    let mut label = Emotion::ALL[0];
    let mut best = scores.score(label);
    for &candidate in &Emotion::ALL[1..] {
        let score = scores.score(candidate);
        if score > best {
            best = score;
            label = candidate;
        }
    }

    let intensity = (best as f64 * 10.0).round().clamp(0.0, 10.0) as u8;
    DominantEmotion { label, intensity }
}

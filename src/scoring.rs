//! Fusion of emotion match, object bias and face quality into one score.
//!
//! Scores are only comparable within one batch. Ranking uses a stable sort,
//! so equal scores keep enumeration order.

use crate::model::{BiasRule, FaceDetection, ImageRecord, ScoreComponents};

#[derive(Clone, Debug, PartialEq)]
pub struct FusionParams {
    /// Partial faces at or above this completeness keep it as their factor.
    pub partial_full_credit: f64,
    /// Factor for partial faces below `partial_full_credit`.
    pub partial_penalty: f64,
    /// `face_quality_score` of an image with no faces.
    pub no_face_score: f64,
    /// Average per-face quality above which several faces earn a bonus.
    pub multi_face_avg_threshold: f64,
    pub multi_face_bonus: f64,
    /// Upper bound on the face quality used for the final multiplier.
    pub quality_cap: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            partial_full_credit: 0.7,
            partial_penalty: 0.3,
            no_face_score: -1.0,
            multi_face_avg_threshold: 0.8,
            multi_face_bonus: 1.2,
            quality_cap: 2.0,
        }
    }
}

pub struct ScoreFusion {
    params: FusionParams,
}

impl ScoreFusion {
    pub fn new(params: FusionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    pub fn quality_factor(&self, face: &FaceDetection) -> f64 {
        if !face.is_partial {
            1.0
        } else if face.face_completeness >= self.params.partial_full_credit {
            face.face_completeness
        } else {
            self.params.partial_penalty
        }
    }

    fn weighted_quality(&self, face: &FaceDetection) -> f64 {
        face.face_quality * self.quality_factor(face)
    }

    /// Compute the final score and its components for `record`.
    pub fn score(&self, record: &ImageRecord, desired_emotion: &str, bias_rules: &[BiasRule]) -> (f64, ScoreComponents) {
        let emotion_score: f64 = record
            .faces
            .iter()
            .filter(|face| face.emotion_matches(desired_emotion))
            .map(|face| self.weighted_quality(face))
            .sum();

        let face_quality_score = if record.faces.is_empty() {
            self.params.no_face_score
        } else {
            let total: f64 = record.faces.iter().map(|f| self.weighted_quality(f)).sum();
            let count = record.faces.len();
            if count > 1 && total / count as f64 > self.params.multi_face_avg_threshold {
                total * self.params.multi_face_bonus
            } else {
                total
            }
        };

        let object_score: f64 = record
            .objects
            .iter()
            .filter_map(|object| bias_rules.iter().find(|rule| rule.matches(&object.label)))
            .map(|rule| emotion_score * rule.biasamount)
            .sum();

        let mut final_score = emotion_score + object_score;
        if !record.faces.is_empty() && face_quality_score > 0.0 {
            final_score *= 0.5 + 0.5 * face_quality_score.min(self.params.quality_cap);
        }

        (
            final_score,
            ScoreComponents {
                emotion_score,
                object_score,
                face_quality_score,
                final_score,
            },
        )
    }

    /// Score `record` in place.
    pub fn apply(&self, record: &mut ImageRecord, desired_emotion: &str, bias_rules: &[BiasRule]) {
        let (score, components) = self.score(record, desired_emotion, bias_rules);
        record.score = score;
        record.score_components = components;
    }
}

/// Highest score first; ties keep their current order.
pub fn rank(records: &mut [ImageRecord]) {
    records.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectDetection, PixelBox};

    fn face(emotion: &str, quality: f64, partial: bool, completeness: f64) -> FaceDetection {
        FaceDetection {
            bbox: PixelBox::new(0, 0, 100, 100),
            emotion: emotion.into(),
            is_partial: partial,
            face_completeness: completeness,
            face_quality: quality,
            face_size_ratio: 0.05,
        }
    }

    fn object(label: &str) -> ObjectDetection {
        ObjectDetection {
            label: label.into(),
            confidence: 0.9,
            bbox: PixelBox::new(0, 0, 10, 10),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_matching_face() {
        let mut record = ImageRecord::new("a.jpg");
        record.faces.push(face("Happy", 0.8, false, 1.0));
        let (score, c) = ScoreFusion::new(FusionParams::default()).score(&record, "happy", &[]);
        assert!(close(c.emotion_score, 0.8));
        assert_eq!(c.object_score, 0.0);
        assert!(close(c.face_quality_score, 0.8));
        assert!(close(score, 0.72));
        assert_eq!(score, c.final_score);
    }

    #[test]
    fn faceless_image_scores_zero_with_penalty_component() {
        let mut record = ImageRecord::new("b.jpg");
        record.objects.push(object("dog"));
        let rules = [BiasRule {
            name: "dog".into(),
            biasamount: 2.0,
        }];
        let (score, c) = ScoreFusion::new(FusionParams::default()).score(&record, "happy", &rules);
        assert_eq!(c.face_quality_score, -1.0);
        assert_eq!(c.object_score, 0.0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn partial_faces_use_completeness_or_fixed_penalty() {
        let fusion = ScoreFusion::new(FusionParams::default());
        assert_eq!(fusion.quality_factor(&face("x", 1.0, true, 0.75)), 0.75);
        assert_eq!(fusion.quality_factor(&face("x", 1.0, true, 0.6)), 0.3);
        assert_eq!(fusion.quality_factor(&face("x", 1.0, false, 1.0)), 1.0);
    }

    #[test]
    fn bias_amplifies_emotion_with_first_matching_rule() {
        let mut record = ImageRecord::new("c.jpg");
        record.faces.push(face("happy", 0.5, false, 1.0));
        record.objects.push(object("DOG"));
        record.objects.push(object("cat"));
        record.objects.push(object("tree"));
        let rules = [
            BiasRule {
                name: "dog".into(),
                biasamount: 1.0,
            },
            BiasRule {
                name: "Dog".into(),
                biasamount: 10.0,
            },
            BiasRule {
                name: "cat".into(),
                biasamount: -0.5,
            },
        ];
        let (score, c) = ScoreFusion::new(FusionParams::default()).score(&record, "happy", &rules);
        assert!(close(c.object_score, 0.5 - 0.25));
        assert!(close(score, (0.5 + 0.25) * 0.75));
    }

    #[test]
    fn several_good_faces_earn_bonus_and_multiplier_is_capped() {
        let mut record = ImageRecord::new("d.jpg");
        for _ in 0..3 {
            record.faces.push(face("happy", 0.9, false, 1.0));
        }
        let (score, c) = ScoreFusion::new(FusionParams::default()).score(&record, "happy", &[]);
        assert!(close(c.face_quality_score, 2.7 * 1.2));
        assert!(close(score, 2.7 * 1.5));
    }

    #[test]
    fn several_faces_at_average_threshold_get_no_bonus() {
        let fusion = ScoreFusion::new(FusionParams::default());

        let mut at_threshold = ImageRecord::new("f.jpg");
        at_threshold.faces.push(face("happy", 0.8, false, 1.0));
        at_threshold.faces.push(face("happy", 0.8, false, 1.0));
        let (score, c) = fusion.score(&at_threshold, "happy", &[]);
        assert!(close(c.face_quality_score, 1.6));
        assert!(close(score, 1.6 * (0.5 + 0.5 * 1.6)));

        let mut mediocre = ImageRecord::new("g.jpg");
        mediocre.faces.push(face("happy", 0.5, false, 1.0));
        mediocre.faces.push(face("sad", 0.5, false, 1.0));
        let (_, c) = fusion.score(&mediocre, "happy", &[]);
        assert!(close(c.face_quality_score, 1.0));
    }

    #[test]
    fn non_matching_faces_count_for_quality_only() {
        let mut record = ImageRecord::new("e.jpg");
        record.faces.push(face("sad", 0.6, false, 1.0));
        let (score, c) = ScoreFusion::new(FusionParams::default()).score(&record, "happy", &[]);
        assert_eq!(c.emotion_score, 0.0);
        assert!(close(c.face_quality_score, 0.6));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn rank_is_descending_and_stable() {
        let mut records: Vec<ImageRecord> = ["a", "b", "c", "d"]
            .iter()
            .zip([0.5, 0.9, 0.5, 0.1])
            .map(|(name, score)| {
                let mut r = ImageRecord::new(*name);
                r.score = score;
                r
            })
            .collect();
        rank(&mut records);
        let names: Vec<&str> = records.iter().map(|r| r.image_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn rank_orders_nan_scores_deterministically() {
        let mut records: Vec<ImageRecord> = ["a", "b", "c", "d"]
            .iter()
            .zip([0.2, f64::NAN, 0.7, 0.2])
            .map(|(name, score)| {
                let mut r = ImageRecord::new(*name);
                r.score = score;
                r
            })
            .collect();
        rank(&mut records);
        let finite: Vec<&str> = records
            .iter()
            .filter(|r| !r.score.is_nan())
            .map(|r| r.image_name.as_str())
            .collect();
        assert_eq!(finite, vec!["c", "a", "d"]);
        assert_eq!(records.len(), 4);
    }
}

use crate::avatar::service::AvatarSubmission;
use crate::avatar::types::{AvatarRecord, ColorProfile, ColorimetryResult, PhotoScore, Swatch};

pub fn default_color_profile() -> ColorProfile {
    ColorProfile {
        season: Some("Otoño".to_string()),
        skin_tone: Some("Cálido - Medio".to_string()),
        undertone: Some("Dorado".to_string()),
    }
}

pub fn default_recommended_colors() -> Vec<Swatch> {
    vec![
        Swatch::new("Terracota", "#DB705C"),
        Swatch::new("Oliva", "#7E8F41"),
        Swatch::new("Mostaza", "#D9A441"),
        Swatch::new("Camel", "#C8A274"),
        Swatch::new("Chocolate", "#7A4A2C"),
        Swatch::new("Beige Cálido", "#E3C9A8"),
    ]
}

pub fn default_avoid_colors() -> Vec<Swatch> {
    vec![
        Swatch::new("Negro Puro", "#1A1A1A"),
        Swatch::new("Gris Frío", "#9AA5B1"),
        Swatch::new("Azul Hielo", "#C8D9F1"),
    ]
}

fn first_text<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn first_list<'a, T: Clone + 'a>(candidates: impl IntoIterator<Item = Option<&'a [T]>>) -> Vec<T> {
    candidates
        .into_iter()
        .flatten()
        .find(|list| !list.is_empty())
        .map(<[T]>::to_vec)
        .unwrap_or_default()
}

/// Where each avatar field can come from, highest priority first:
/// submitted form, colorimetry analysis, stored record, fixed default.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionSources<'a> {
    pub form: &'a AvatarSubmission,
    pub analysis: Option<&'a ColorimetryResult>,
    pub existing: Option<&'a AvatarRecord>,
    /// Only creation falls back to the fixed profile and palettes.
    pub apply_defaults: bool,
}

impl<'a> ResolutionSources<'a> {
    fn default_profile(&self) -> Option<ColorProfile> {
        self.apply_defaults.then(default_color_profile)
    }

    pub fn resolve_season(&self) -> Option<String> {
        let default = self.default_profile();
        first_text([
            self.form.season.as_deref(),
            self.analysis.and_then(|analysis| analysis.season.as_deref()),
            self.existing
                .and_then(|record| record.color_profile.season.as_deref()),
            default.as_ref().and_then(|profile| profile.season.as_deref()),
        ])
    }

    pub fn resolve_skin_tone(&self) -> Option<String> {
        let default = self.default_profile();
        first_text([
            self.form.skin_tone.as_deref(),
            self.analysis.and_then(|analysis| analysis.skin_tone.as_deref()),
            self.existing
                .and_then(|record| record.color_profile.skin_tone.as_deref()),
            default.as_ref().and_then(|profile| profile.skin_tone.as_deref()),
        ])
    }

    pub fn resolve_undertone(&self) -> Option<String> {
        let default = self.default_profile();
        first_text([
            self.form.undertone.as_deref(),
            self.analysis.and_then(|analysis| analysis.undertone.as_deref()),
            self.existing
                .and_then(|record| record.color_profile.undertone.as_deref()),
            default.as_ref().and_then(|profile| profile.undertone.as_deref()),
        ])
    }

    pub fn resolve_color_profile(&self) -> ColorProfile {
        ColorProfile {
            season: self.resolve_season(),
            skin_tone: self.resolve_skin_tone(),
            undertone: self.resolve_undertone(),
        }
    }

    pub fn resolve_recommended_colors(&self) -> Vec<Swatch> {
        let default = self.apply_defaults.then(default_recommended_colors);
        first_list([
            Some(self.form.recommended_colors.as_slice()),
            self.analysis
                .map(|analysis| analysis.recommended_colors.as_slice()),
            self.existing
                .map(|record| record.recommended_colors.as_slice()),
            default.as_deref(),
        ])
    }

    pub fn resolve_avoid_colors(&self) -> Vec<Swatch> {
        let default = self.apply_defaults.then(default_avoid_colors);
        first_list([
            Some(self.form.avoid_colors.as_slice()),
            self.analysis.map(|analysis| analysis.avoid_colors.as_slice()),
            self.existing.map(|record| record.avoid_colors.as_slice()),
            default.as_deref(),
        ])
    }

    /// Scores are never defaulted here; the wizard supplies its own.
    pub fn resolve_photo_scores(&self) -> Vec<PhotoScore> {
        first_list([
            Some(self.form.photo_scores.as_slice()),
            self.existing
                .map(|record| record.photo_quality_scores.as_slice()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn analysis() -> ColorimetryResult {
        ColorimetryResult {
            season: Some("Invierno".to_string()),
            skin_tone: None,
            undertone: Some("Frío".to_string()),
            recommended_colors: vec![Swatch::new("Azul rey", "#1F4E9C")],
            avoid_colors: vec![Swatch::new("Naranja", "#F57C00")],
        }
    }

    fn existing() -> AvatarRecord {
        AvatarRecord {
            user_id: 7,
            image_reference: Some("https://bucket/avatars/old.jpg".to_string()),
            photo_quality_scores: vec![PhotoScore::new("Nitidez", 80.0)],
            created_at: Utc::now(),
            color_profile: ColorProfile {
                season: Some("Verano".to_string()),
                skin_tone: Some("Claro".to_string()),
                undertone: None,
            },
            recommended_colors: vec![Swatch::new("Lavanda", "#B57EDC")],
            avoid_colors: Vec::new(),
        }
    }

    #[test]
    fn form_beats_every_other_source() {
        let form = AvatarSubmission {
            season: Some("Primavera".to_string()),
            recommended_colors: vec![Swatch::new("Coral", "#FF7F50")],
            ..AvatarSubmission::default()
        };
        let analysis = analysis();
        let existing = existing();
        let sources = ResolutionSources {
            form: &form,
            analysis: Some(&analysis),
            existing: Some(&existing),
            apply_defaults: true,
        };
        assert_eq!(sources.resolve_season().as_deref(), Some("Primavera"));
        assert_eq!(
            sources.resolve_recommended_colors(),
            vec![Swatch::new("Coral", "#FF7F50")]
        );
    }

    #[test]
    fn analysis_beats_existing_which_beats_default() {
        let form = AvatarSubmission::default();
        let analysis = analysis();
        let existing = existing();
        let sources = ResolutionSources {
            form: &form,
            analysis: Some(&analysis),
            existing: Some(&existing),
            apply_defaults: true,
        };
        assert_eq!(sources.resolve_season().as_deref(), Some("Invierno"));
        assert_eq!(sources.resolve_skin_tone().as_deref(), Some("Claro"));
        assert_eq!(sources.resolve_undertone().as_deref(), Some("Frío"));
        assert_eq!(sources.resolve_photo_scores(), existing.photo_quality_scores);
    }

    #[test]
    fn defaults_only_apply_when_requested() {
        let form = AvatarSubmission {
            season: Some("   ".to_string()),
            ..AvatarSubmission::default()
        };
        let creating = ResolutionSources {
            form: &form,
            analysis: None,
            existing: None,
            apply_defaults: true,
        };
        assert_eq!(creating.resolve_color_profile(), default_color_profile());
        assert_eq!(creating.resolve_avoid_colors(), default_avoid_colors());
        assert!(creating.resolve_photo_scores().is_empty());

        let existing = existing();
        let updating = ResolutionSources {
            apply_defaults: false,
            existing: Some(&existing),
            ..creating
        };
        assert_eq!(updating.resolve_undertone(), None);
        assert!(updating.resolve_avoid_colors().is_empty());
        assert_eq!(updating.resolve_season().as_deref(), Some("Verano"));
    }
}

//! Hand-written portrait prompts grouped by gender and category.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn token(self) -> &'static str {
        match self {
            Gender::Male => "m",
            Gender::Female => "f",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Gender::ALL.into_iter().find(|gender| gender.token() == token)
    }

    pub fn label(self) -> &'static str {
        match self {
            Gender::Male => "👨 Мужские образы",
            Gender::Female => "👩 Женские образы",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    City,
    Studio,
    Nature,
    Business,
    Cinematic,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::City,
        Category::Studio,
        Category::Nature,
        Category::Business,
        Category::Cinematic,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Category::City => "city",
            Category::Studio => "studio",
            Category::Nature => "nature",
            Category::Business => "biz",
            Category::Cinematic => "cine",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Category::ALL
            .into_iter()
            .find(|category| category.token() == token)
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::City => "🏙 Город",
            Category::Studio => "🎞 Студия",
            Category::Nature => "🌿 Природа",
            Category::Business => "🧠 Деловой стиль",
            Category::Cinematic => "🎬 Кино",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prompt {
    pub title: &'static str,
    pub text: &'static str,
}

const fn p(title: &'static str, text: &'static str) -> Prompt {
    Prompt { title, text }
}

const MALE_CITY: &[Prompt] = &[
    p("🗽 Нью-Йорк", "portrait photo of a man in New York city street, urban candid, shallow depth of field, realistic lighting"),
    p("🏙 Москва-Сити", "portrait of a man at Moscow-City skyline, modern architecture background, cinematic lighting"),
    p("🌃 Крыша на закате", "Golden-hour city rooftop portrait of a man, wind gently moving hair, glass skyscrapers glowing behind, candid laugh, shallow depth of field, editorial magazine feel, 85mm f/1.4"),
    p("🌧 Неон и дождь", "Rainy street at night, a man with an umbrella, neon reflections on wet asphalt, cinematic silhouette, teal and magenta palette, light mist, 50mm, f/2, street photography aesthetic"),
];

const FEMALE_CITY: &[Prompt] = &[
    p("🗽 Нью-Йорк", "portrait photo of a woman in New York city street, urban candid, shallow depth of field, realistic lighting"),
    p("🧳 Европа casual", "portrait of a woman in a european old town, cobblestone, soft overcast light, lifestyle portrait"),
    p("☕ Кафе у окна", "Cafe window portrait of a woman, natural backlight, reflections and bokeh lights in the glass, candid smile, latte on the table, warm tones, analog film softness, 35mm documentary style"),
    p("🌸 Весенний парк", "Vibrant spring park, cherry blossoms falling, a woman with a playful smile, pastel colors, dreamy bokeh, 85mm portrait"),
];

const MALE_STUDIO: &[Prompt] = &[
    p("🎞 Мягкий свет", "studio headshot of a man, soft light, beauty dish, professional portrait photography, high detail"),
    p("🖤 Рембрандт", "Moody studio portrait of a man with Rembrandt lighting, deep shadows, elegant black turtleneck, calm confident gaze, fine skin details, medium format look, dark backdrop"),
    p("⚫ Ч/Б классика", "High-contrast black-and-white studio portrait of a man, dramatic shadows, intense gaze, classic fine-art style, medium format look, precise tonality"),
];

const FEMALE_STUDIO: &[Prompt] = &[
    p("🎞 Мягкий свет", "studio headshot of a woman, soft light, beauty dish, professional portrait photography, high detail"),
    p("💄 Бьюти", "Studio portrait of a woman with soft clamshell lighting, impeccable skin, clean beauty look"),
    p("🎨 Цветные гели", "Indoor studio colored-gel portrait of a woman (teal and orange), fashion-forward outfit, subtle smoke haze, glossy highlights, high-end editorial, 85mm close-up"),
];

const MALE_NATURE: &[Prompt] = &[
    p("🌲 Лесная поляна", "Forest clearing at sunrise, a man in a warm cozy jacket, golden rays through fog, earthy tones, hands in pockets, contemplative expression, 85mm portrait, editorial nature vibe"),
    p("🏔 Горная тропа", "Snowy mountain path, soft overcast light, a man in a cozy scarf and coat, breath visible in the cold air, calm expression, minimal color palette"),
    p("🌊 Утёс у моря", "Cliffside at golden hour, a man above a dramatic sea, soft rim light, determined look, cinematic hero shot"),
];

const FEMALE_NATURE: &[Prompt] = &[
    p("🌾 Летний луг", "Summer meadow with tall grass, a woman in a floral linen outfit, pastel sky, gentle breeze, warm film tones, sun flare, dreamy and serene, 85mm f/2"),
    p("🌅 Золотой час", "outdoor portrait of a woman at golden hour, warm sunlight, backlit hair, natural bokeh"),
    p("🍂 Осенний лес", "Crisp autumn forest, golden leaves, a woman in a cozy cardigan, soft backlight, nostalgic atmosphere, filmic grain"),
];

const MALE_BUSINESS: &[Prompt] = &[
    p("🧠 Business headshot", "corporate business headshot of a man, neutral background, clean lighting, professional attire"),
    p("🌆 Вечерний костюм", "Classy evening portrait of a man in an elegant suit, blurred city lights behind, reflective surfaces, cinematic depth, refined color grade"),
    p("💻 Коворкинг", "Modern co-working interior, plants and wood, natural light, a man with a laptop, candid smile, lifestyle"),
];

const FEMALE_BUSINESS: &[Prompt] = &[
    p("🧠 Business headshot", "corporate business headshot of a woman, neutral background, clean lighting, professional attire"),
    p("🏛 Арт-деко лобби", "Art deco lobby, geometric lines, polished marble, a woman with an elegant posture, luxe magazine vibe"),
    p("🖼 Галерея", "Contemporary art gallery, polished floor reflections, soft overhead light, a woman with a confident posture, clean palette"),
];

const MALE_CINEMATIC: &[Prompt] = &[
    p("💡 Киберпанк", "futuristic cyberpunk portrait of a man, neon lights, rain reflections, moody cinematic"),
    p("🕵 Нуар", "Noir alley at night, a man in a retro outfit, hard side light, dramatic shadows, mysterious atmosphere, wet pavement reflecting neon"),
    p("🏜 Трасса в пустыне", "Desert highway at sunset, a man in a denim jacket, long shadows, bold color contrast, sun flare, cinematic wide framing, 50mm, travel editorial feel"),
];

const FEMALE_CINEMATIC: &[Prompt] = &[
    p("💡 Киберпанк", "futuristic cyberpunk portrait of a woman, neon lights, rain reflections, moody cinematic"),
    p("🎬 Кадр из фильма", "Classic cinema still of a woman, soft grain, gentle halation, expressive eyes, close-up framing, impeccable skin tone rendering"),
    p("🎡 Ночная ярмарка", "Night carnival lights, ferris wheel bokeh, a woman with a joyful expression, neon, cinematic tones"),
];

pub fn prompts(gender: Gender, category: Category) -> &'static [Prompt] {
    match (gender, category) {
        (Gender::Male, Category::City) => MALE_CITY,
        (Gender::Female, Category::City) => FEMALE_CITY,
        (Gender::Male, Category::Studio) => MALE_STUDIO,
        (Gender::Female, Category::Studio) => FEMALE_STUDIO,
        (Gender::Male, Category::Nature) => MALE_NATURE,
        (Gender::Female, Category::Nature) => FEMALE_NATURE,
        (Gender::Male, Category::Business) => MALE_BUSINESS,
        (Gender::Female, Category::Business) => FEMALE_BUSINESS,
        (Gender::Male, Category::Cinematic) => MALE_CINEMATIC,
        (Gender::Female, Category::Cinematic) => FEMALE_CINEMATIC,
    }
}

/// `None` when the index came from a button built against another catalog.
pub fn prompt(gender: Gender, category: Category, index: usize) -> Option<&'static Prompt> {
    prompts(gender, category).get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_group_has_prompts_that_fit_a_button() {
        for gender in Gender::ALL {
            for category in Category::ALL {
                let group = prompts(gender, category);
                assert!(!group.is_empty());
                for prompt in group {
                    assert!(!prompt.text.trim().is_empty());
                    assert!(prompt.title.chars().count() <= 32);
                }
            }
        }
    }

    #[test]
    fn tokens_round_trip() {
        for gender in Gender::ALL {
            assert_eq!(Gender::from_token(gender.token()), Some(gender));
        }
        for category in Category::ALL {
            assert_eq!(Category::from_token(category.token()), Some(category));
        }
        assert_eq!(Category::from_token("space"), None);
    }

    #[test]
    fn out_of_range_index_is_none() {
        assert!(prompt(Gender::Male, Category::Studio, 0).is_some());
        assert!(prompt(Gender::Male, Category::Studio, 99).is_none());
    }
}

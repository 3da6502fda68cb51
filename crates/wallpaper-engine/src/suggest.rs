use rand::seq::SliceRandom;
use rand::Rng;

pub const PROMPT_SUGGESTIONS: [&str; 10] = [
    "A majestic bioluminescent forest at night, with glowing mushrooms and ethereal creatures, cinematic lighting, ultra detailed.",
    "An astronaut discovering an ancient alien artifact on a desolate Mars-like planet, dramatic dust storm in the background, 4K, photorealistic.",
    "A serene Japanese zen garden in spring, with cherry blossoms, a koi pond, and a traditional pagoda, watercolor style.",
    "Steampunk city skyline at sunset, intricate brass machinery, airships flying in the sky, warm golden hour lighting.",
    "A minimalist abstract painting of a soundwave, using only three colors: deep indigo, electric cyan, and pure white.",
    "An enchanting underwater city of Atlantis, with coral architecture and schools of vibrant fish, fantasy art.",
    "Portrait of a futuristic cybernetic ronin with a glowing katana, in a rainy, neon-lit alley of Neo-Tokyo, cyberpunk aesthetic.",
    "A cozy, cluttered wizard's study filled with ancient books, magical artifacts, and a crackling fireplace, warm and inviting.",
    "Surreal landscape where the ocean meets the clouds, with giant floating islands and waterfalls cascading into the sky, dreamlike.",
    "A photorealistic close-up of a chameleon's eye, reflecting a tiny, detailed galaxy within its iris.",
];

pub fn suggest_prompt() -> &'static str {
    suggest_prompt_with(&mut rand::thread_rng())
}

pub fn suggest_prompt_with<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    PROMPT_SUGGESTIONS
        .choose(rng)
        .copied()
        .unwrap_or(PROMPT_SUGGESTIONS[0])
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{suggest_prompt, suggest_prompt_with, PROMPT_SUGGESTIONS};

    #[test]
    fn suggestions_come_from_the_fixed_list() {
        for _ in 0..20 {
            assert!(PROMPT_SUGGESTIONS.contains(&suggest_prompt()));
        }
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let first = suggest_prompt_with(&mut StdRng::seed_from_u64(7));
        let second = suggest_prompt_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
    }
}

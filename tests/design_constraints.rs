use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use windbore::optimization::{
    constraint_checks, constraint_score, initial_state_vec, unpack, DesignerConfig,
};

const SAMPLES: usize = 300;
const JITTER: f64 = 0.15;

fn presets() -> Vec<DesignerConfig> {
    vec![
        DesignerConfig::folk_whistle(),
        DesignerConfig::straight_folk_flute(),
        DesignerConfig::three_hole_pipe(),
        DesignerConfig::shawm(),
    ]
}

fn score_is_zero_iff_checks_hold(config: &DesignerConfig, vector: &[f64]) {
    let inst = unpack(config, vector);
    let all_hold = constraint_checks(config, &inst).iter().all(|&c| c >= 0.0);
    let score = constraint_score(config, &inst);
    assert!(score >= 0.0);
    assert_eq!(score == 0.0, all_hold, "{}: {vector:?}", config.name);
}

#[test]
fn random_vectors_respect_the_iff() {
    let mut rng = StdRng::seed_from_u64(2024);
    for config in presets() {
        let start = initial_state_vec(&config);
        for _ in 0..SAMPLES {
            let vector: Vec<f64> = start
                .iter()
                .map(|&x| x + rng.gen_range(-JITTER..JITTER))
                .collect();
            score_is_zero_iff_checks_hold(&config, &vector);
        }
    }
}

#[test]
fn boundary_vectors_respect_the_iff() {
    let config = DesignerConfig::three_hole_pipe();
    let start = initial_state_vec(&config);

    // Bottom hole exactly on the bottom clearance.
    let mut on_edge = start.clone();
    on_edge[1] = config.bottom_clearance_fraction;
    score_is_zero_iff_checks_hold(&config, &on_edge);

    // Smallest and largest hole diameters.
    let n = config.n_holes();
    for fraction in [0.0, 1.0] {
        let mut vector = start.clone();
        for slot in &mut vector[1 + n..1 + 2 * n] {
            *slot = fraction;
        }
        score_is_zero_iff_checks_hold(&config, &vector);
    }

    // Just past the largest diameter.
    let mut too_big = start;
    too_big[1 + n] = 1.0001;
    score_is_zero_iff_checks_hold(&config, &too_big);
    assert!(constraint_score(&config, &unpack(&config, &too_big)) > 0.0);
}

#[test]
fn feasible_initial_designs_round_trip() {
    for config in [DesignerConfig::straight_folk_flute(), DesignerConfig::three_hole_pipe()] {
        let vector = initial_state_vec(&config);
        let inst = unpack(&config, &vector);
        assert_eq!(constraint_score(&config, &inst), 0.0, "{}", config.name);
        assert_eq!(inst.n_holes(), config.n_holes());
        assert!(inst.hole_positions.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn presets_survive_json() {
    for config in presets() {
        let json = config.to_json().unwrap();
        let back = DesignerConfig::from_json(&json).unwrap();
        assert_eq!(back.name, config.name);
        assert_eq!(back.fingerings, config.fingerings);
        assert_eq!(back.state_len(), config.state_len());
        assert_eq!(back.closed_top, config.closed_top);
    }
}

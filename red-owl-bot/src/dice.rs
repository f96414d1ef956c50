use anyhow::Result;
use poise::CreateReply;
use rand::Rng;
use rand::seq::SliceRandom;
use serenity::all::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter};

use crate::command::Context;

const MAX_DICE: i64 = 100;
const SUCCESS_THRESHOLD: u8 = 3;
const EXPLODING_FACE: u8 = 6;
const FATE_FACES: [i8; 3] = [-1, 0, 1];
const EMBED_COLOUR: u32 = 0x4CAF50;

/// Result of a hexa pool: every wave of dice (sorted high to low) and the
/// number of successes across all waves.
#[derive(Debug, Clone, PartialEq)]
pub struct HexaRoll {
    pub waves: Vec<Vec<u8>>,
    pub successes: u32,
}

/// Roll `num_dice` d6. Every die of 3+ is a success and every 6 is rolled again
/// in the next wave until a wave has no 6 left.
pub fn roll_hexa(num_dice: u32, rng: &mut impl Rng) -> HexaRoll {
    let mut waves = Vec::new();
    let mut successes = 0;
    let mut remaining = num_dice;

    while remaining > 0 {
        let mut wave: Vec<u8> = (0..remaining).map(|_| rng.gen_range(1..=6)).collect();
        wave.sort_unstable_by(|a, b| b.cmp(a));

        successes += wave.iter().filter(|d| **d >= SUCCESS_THRESHOLD).count() as u32;
        remaining = wave.iter().filter(|d| **d == EXPLODING_FACE).count() as u32;
        waves.push(wave);
    }

    HexaRoll { waves, successes }
}

/// Roll four Fate dice.
pub fn roll_fate(rng: &mut impl Rng) -> [i8; 4] {
    std::array::from_fn(|_| *FATE_FACES.choose(rng).unwrap_or(&0))
}

fn format_die(die: u8) -> String {
    if die == EXPLODING_FACE {
        format!("**{die}**")
    } else {
        die.to_string()
    }
}

fn format_fate_die(die: i8) -> &'static str {
    match die {
        -1 => "[-]",
        1 => "[+]",
        _ => "[0]",
    }
}

fn fate_total(dice: &[i8], bonus: i64) -> i64 {
    dice.iter().map(|d| i64::from(*d)).sum::<i64>().saturating_add(bonus)
}

fn success_summary(initial: u32, extra: i64) -> String {
    let mut text = format!("**{initial}** successes");
    if extra != 0 {
        let total = i64::from(initial).saturating_add(extra);
        text.push_str(&format!(" + **{extra}** extra = **{total}** total"));
    }
    text
}

fn wave_details(waves: &[Vec<u8>]) -> String {
    waves
        .iter()
        .enumerate()
        .map(|(i, wave)| {
            let dice: Vec<String> = wave.iter().map(|d| format_die(*d)).collect();
            format!("🎲 Roll {}: {}", i + 1, dice.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" \n ")
}

/// Roll a pool of d6 (success on 3+, sixes explode)
#[poise::command(prefix_command, slash_command, aliases("h"))]
pub async fn hexa(
    ctx: Context<'_>,
    #[description = "Number of d6 to roll (1-100)"] num_dice: i64,
    #[description = "Successes to add to the result"] extra_success: Option<i64>,
) -> Result<()> {
    if num_dice < 1 {
        ctx.say("You must roll at least 1 die.").await?;
        return Ok(());
    }
    if num_dice > MAX_DICE {
        ctx.say(format!("You can roll at most {MAX_DICE} dice."))
            .await?;
        return Ok(());
    }

    let extra = extra_success.unwrap_or(0);
    let roll = roll_hexa(num_dice as u32, &mut rand::thread_rng());
    let author = ctx.author();

    let embed = CreateEmbed::new()
        .title("🎲 Roll results")
        .colour(EMBED_COLOUR)
        .author(CreateEmbedAuthor::new(author.display_name()).icon_url(author.face()))
        .field("🏆 Successes", success_summary(roll.successes, extra), false)
        .field("Roll details", wave_details(&roll.waves), false)
        .footer(CreateEmbedFooter::new(format!(
            "Requested by {}",
            author.display_name()
        )));

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Roll 4 Fate dice with an optional bonus
#[poise::command(prefix_command, slash_command)]
pub async fn fate(
    ctx: Context<'_>,
    #[description = "Bonus added to the total"] bonus: Option<i64>,
) -> Result<()> {
    let bonus = bonus.unwrap_or(0);
    let dice = roll_fate(&mut rand::thread_rng());
    let total = fate_total(&dice, bonus);
    let author = ctx.author();

    let details: Vec<&str> = dice.iter().map(|d| format_fate_die(*d)).collect();
    let mut embed = CreateEmbed::new()
        .title("🎲 Fate roll")
        .colour(EMBED_COLOUR)
        .author(CreateEmbedAuthor::new(author.display_name()).icon_url(author.face()))
        .field("Dice", details.join(" "), false);

    if bonus != 0 {
        embed = embed.field("Bonus", format!("{bonus:+}"), false);
    }

    embed = embed.field("Total", total.to_string(), false);

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn waves_follow_sixes_and_count_successes() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let roll = roll_hexa(10, &mut rng);

            assert_eq!(roll.waves[0].len(), 10);
            for pair in roll.waves.windows(2) {
                let sixes = pair[0].iter().filter(|d| **d == 6).count();
                assert_eq!(pair[1].len(), sixes);
            }
            assert!(!roll.waves.last().unwrap().contains(&6));

            let expected = roll.waves.iter().flatten().filter(|d| **d >= 3).count() as u32;
            assert_eq!(roll.successes, expected);
            for wave in &roll.waves {
                assert!(wave.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }

    #[test]
    fn fate_dice_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert!(roll_fate(&mut rng).iter().all(|d| (-1..=1).contains(d)));
        }
    }

    #[test]
    fn summaries_render_sixes_and_extras() {
        assert_eq!(success_summary(3, 0), "**3** successes");
        assert_eq!(
            success_summary(3, 2),
            "**3** successes + **2** extra = **5** total"
        );
        assert_eq!(
            wave_details(&[vec![6, 4, 1], vec![2]]),
            "🎲 Roll 1: **6**, 4, 1 \n 🎲 Roll 2: 2"
        );
        assert_eq!(format_fate_die(-1), "[-]");
        assert_eq!(format_fate_die(0), "[0]");
    }

    #[test]
    fn extreme_bonuses_saturate() {
        assert_eq!(fate_total(&[1, 1, 0, -1], 2), 3);
        assert_eq!(fate_total(&[1, 1, 1, 1], i64::MAX), i64::MAX);
        assert_eq!(fate_total(&[-1, -1, -1, -1], i64::MIN), i64::MIN);
        assert_eq!(
            success_summary(4, i64::MAX),
            format!("**4** successes + **{}** extra = **{}** total", i64::MAX, i64::MAX)
        );
    }
}

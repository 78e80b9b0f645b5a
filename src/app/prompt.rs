use std::io::{BufRead, Write};

use anyhow::Result;

use crate::catalog::AnimeRef;

use super::coordinator::Coordinator;
use super::format::truncate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selection {
    pub(crate) anime: AnimeRef,
    pub(crate) episode: u32,
}

/// Line-based search flow: query, pick a result, pick an episode.
/// Returns `None` when the user backs out with an empty answer or EOF.
pub(crate) fn search_and_pick(
    coordinator: &Coordinator,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Option<Selection>> {
    let Some(query) = ask(input, output, "Search anime: ")? else {
        return Ok(None);
    };

    let results = coordinator.search(&query);
    if results.is_empty() {
        writeln!(output, "No results for \"{query}\".")?;
        return Ok(None);
    }
    for (idx, anime) in results.iter().enumerate() {
        let episodes = anime
            .available_episodes
            .map(|count| format!(" ({count} episodes)"))
            .unwrap_or_default();
        writeln!(output, "{:>3}. {}{}", idx + 1, truncate(&anime.name, 60), episodes)?;
    }

    let prompt = format!("Pick [1-{}]: ", results.len());
    let Some(pick) = ask_until(input, output, &prompt, |raw| parse_choice(raw, results.len()))?
    else {
        return Ok(None);
    };
    let anime = results[pick].clone();

    let episodes = coordinator.episodes(&anime);
    let (Some(first), Some(last)) = (episodes.first(), episodes.last()) else {
        writeln!(output, "No episodes available for {}.", anime.name)?;
        return Ok(None);
    };
    let suggested = coordinator
        .history()
        .get_entry(&anime.id)
        .map(|entry| entry.episode)
        .filter(|episode| episodes.contains(episode))
        .unwrap_or(*first);

    let prompt = format!("Episode [{first}-{last}] (Enter for {suggested}): ");
    let episode = loop {
        write!(output, "{prompt}")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let raw = line.trim();
        if raw.is_empty() {
            break suggested;
        }
        match parse_episode(raw, &episodes) {
            Some(episode) => break episode,
            None => writeln!(output, "Not an available episode: {raw}")?,
        }
    };

    Ok(Some(Selection { anime, episode }))
}

fn ask(input: &mut impl BufRead, output: &mut impl Write, prompt: &str) -> Result<Option<String>> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let answer = line.trim();
    Ok((!answer.is_empty()).then(|| answer.to_string()))
}

fn ask_until<T>(
    input: &mut impl BufRead,
    output: &mut impl Write,
    prompt: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    loop {
        let Some(answer) = ask(input, output, prompt)? else {
            return Ok(None);
        };
        match parse(&answer) {
            Some(value) => return Ok(Some(value)),
            None => writeln!(output, "Invalid choice: {answer}")?,
        }
    }
}

/// One-based menu choice to index.
pub(crate) fn parse_choice(raw: &str, count: usize) -> Option<usize> {
    let choice = raw.trim().parse::<usize>().ok()?;
    (1..=count).contains(&choice).then(|| choice - 1)
}

pub(crate) fn parse_episode(raw: &str, episodes: &[u32]) -> Option<u32> {
    let episode = raw.trim().parse::<u32>().ok()?;
    episodes.contains(&episode).then_some(episode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_choice_is_one_based_and_bounded() {
        assert_eq!(parse_choice("1", 3), Some(0));
        assert_eq!(parse_choice(" 3 ", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("two", 3), None);
    }

    #[test]
    fn parse_episode_requires_listed_episode() {
        let episodes = [1, 2, 3, 5];
        assert_eq!(parse_episode("5", &episodes), Some(5));
        assert_eq!(parse_episode("4", &episodes), None);
        assert_eq!(parse_episode("-1", &episodes), None);
    }

    #[test]
    fn ask_until_retries_invalid_answers() {
        let mut input = std::io::Cursor::new(b"9\nx\n2\n".to_vec());
        let mut output = Vec::new();
        let picked = ask_until(&mut input, &mut output, "Pick: ", |raw| parse_choice(raw, 3))
            .expect("prompt io");
        assert_eq!(picked, Some(1));
        let shown = String::from_utf8(output).expect("utf8");
        assert_eq!(shown.matches("Invalid choice").count(), 2);
    }

    #[test]
    fn ask_returns_none_on_blank_or_eof() {
        let mut output = Vec::new();
        let mut blank = std::io::Cursor::new(b"   \n".to_vec());
        assert_eq!(ask(&mut blank, &mut output, "> ").expect("io"), None);
        let mut eof = std::io::Cursor::new(Vec::new());
        assert_eq!(ask(&mut eof, &mut output, "> ").expect("io"), None);
    }
}

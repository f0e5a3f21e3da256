/// Telephone events as numbered by RFC 2833.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Digit {
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
    Asterisk = 10,
    Pound = 11,
    A = 12,
    B = 13,
    C = 14,
    D = 15,
    Flash = 16,
}

const DIGITS: [Digit; 17] = [
    Digit::Zero,
    Digit::One,
    Digit::Two,
    Digit::Three,
    Digit::Four,
    Digit::Five,
    Digit::Six,
    Digit::Seven,
    Digit::Eight,
    Digit::Nine,
    Digit::Asterisk,
    Digit::Pound,
    Digit::A,
    Digit::B,
    Digit::C,
    Digit::D,
    Digit::Flash,
];

impl Digit {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        DIGITS.get(code as usize).copied()
    }

    pub fn as_char(&self) -> char {
        use Digit::*;

        match self {
            Zero => '0',
            One => '1',
            Two => '2',
            Three => '3',
            Four => '4',
            Five => '5',
            Six => '6',
            Seven => '7',
            Eight => '8',
            Nine => '9',
            Asterisk => '*',
            Pound => '#',
            A => 'A',
            B => 'B',
            C => 'C',
            D => 'D',
            Flash => 'X',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        let digit = match c {
            '0'..='9' => return Self::from_code(c as u8 - b'0'),
            '*' => Digit::Asterisk,
            '#' => Digit::Pound,
            'A' | 'a' => Digit::A,
            'B' | 'b' => Digit::B,
            'C' | 'c' => Digit::C,
            'D' | 'd' => Digit::D,
            '!' | 'X' | 'x' => Digit::Flash,
            _ => return None,
        };

        Some(digit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(Digit::from_char('5').unwrap().code(), 5);
        assert_eq!(Digit::from_char('*').unwrap().code(), 10);
        assert_eq!(Digit::from_char('#').unwrap().code(), 11);
        assert_eq!(Digit::from_char('d').unwrap().code(), 15);
        assert_eq!(Digit::from_char('!').unwrap().code(), 16);
        assert_eq!(Digit::from_char('z'), None);
    }

    #[test]
    fn chars() {
        for code in 0..=16 {
            let digit = Digit::from_code(code).unwrap();
            assert_eq!(digit.code(), code);
            if digit != Digit::Flash {
                assert_eq!(Digit::from_char(digit.as_char()), Some(digit));
            }
        }
        assert_eq!(Digit::from_code(17), None);
    }
}
